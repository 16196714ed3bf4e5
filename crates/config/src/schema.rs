//! Config sections, their defaults, and environment overrides.

use std::time::Duration;

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub store: StoreConfig,
    pub pacer: PacerConfig,
    pub webhooks: WebhookConfig,
    pub cache: CacheConfig,
    pub supervisor: SupervisorConfig,
}

impl GatewayConfig {
    /// Build a config from defaults plus any `WIREGATE_*` variables present
    /// in the process environment. Unparseable values keep the default and
    /// log a warning; a typo must never take the gateway down.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        override_string(&mut cfg.store.database_url, "WIREGATE_DATABASE_URL");
        override_string(&mut cfg.store.data_dir, "WIREGATE_DATA_DIR");

        override_u64(&mut cfg.pacer.min_interval_secs, "WIREGATE_MIN_INTERVAL_SECS");
        override_u32(&mut cfg.pacer.max_per_hour, "WIREGATE_MAX_PER_HOUR");
        override_u32(&mut cfg.pacer.max_per_day, "WIREGATE_MAX_PER_DAY");
        override_u64(&mut cfg.pacer.jitter_max_ms, "WIREGATE_RANDOM_DELAY_MAX_MS");
        override_u64(&mut cfg.pacer.dup_window_secs, "WIREGATE_DUP_WINDOW_SECS");
        override_usize(&mut cfg.pacer.dup_capacity, "WIREGATE_DUP_CAPACITY");

        override_u64(&mut cfg.webhooks.tick_interval_secs, "WIREGATE_WEBHOOK_TICK_SECS");
        override_u32(&mut cfg.webhooks.batch_size, "WIREGATE_WEBHOOK_BATCH_SIZE");
        override_u32(&mut cfg.webhooks.max_retries, "WIREGATE_WEBHOOK_MAX_RETRIES");
        override_u64(&mut cfg.webhooks.base_backoff_secs, "WIREGATE_WEBHOOK_BASE_BACKOFF_SECS");
        override_u64(&mut cfg.webhooks.max_backoff_secs, "WIREGATE_WEBHOOK_MAX_BACKOFF_SECS");
        override_u64(&mut cfg.webhooks.staleness_secs, "WIREGATE_WEBHOOK_STALENESS_SECS");

        override_usize(&mut cfg.cache.l1_capacity, "WIREGATE_MSG_CACHE_SIZE");
        override_u64(&mut cfg.cache.l1_ttl_secs, "WIREGATE_MSG_CACHE_TTL_SECS");
        override_u64(&mut cfg.cache.retention_days, "WIREGATE_MSG_RETENTION_DAYS");
        override_usize(&mut cfg.cache.lid_capacity, "WIREGATE_LID_MAP_CAPACITY");

        override_opt_string(&mut cfg.supervisor.keepalive_url, "WIREGATE_KEEPALIVE_URL");
        override_u64(&mut cfg.supervisor.keepalive_interval_secs, "WIREGATE_KEEPALIVE_INTERVAL_SECS");
        override_u64(&mut cfg.supervisor.memory_warn_mb, "WIREGATE_MEMORY_WARN_MB");
        override_u64(&mut cfg.supervisor.memory_critical_mb, "WIREGATE_MEMORY_CRITICAL_MB");
        override_u32(&mut cfg.supervisor.stagger_max_connects, "WIREGATE_STAGGER_MAX_CONNECTS");
        override_u64(&mut cfg.supervisor.stagger_window_secs, "WIREGATE_STAGGER_WINDOW_SECS");
        override_u64(&mut cfg.supervisor.stagger_gap_min_secs, "WIREGATE_STAGGER_GAP_MIN_SECS");
        override_u64(&mut cfg.supervisor.stagger_gap_max_secs, "WIREGATE_STAGGER_GAP_MAX_SECS");
        override_u64(&mut cfg.supervisor.presence_refresh_min_secs, "WIREGATE_PRESENCE_MIN_SECS");
        override_u64(&mut cfg.supervisor.presence_refresh_max_secs, "WIREGATE_PRESENCE_MAX_SECS");
        override_u64(&mut cfg.supervisor.stale_lock_secs, "WIREGATE_STALE_LOCK_SECS");
        override_u64(&mut cfg.supervisor.auth_sync_interval_secs, "WIREGATE_AUTH_SYNC_INTERVAL_SECS");
        override_u64(&mut cfg.supervisor.debounce_quiet_secs, "WIREGATE_SAVE_QUIET_SECS");
        override_u64(&mut cfg.supervisor.debounce_floor_secs, "WIREGATE_SAVE_FLOOR_SECS");
        override_u64(&mut cfg.supervisor.shutdown_flush_secs, "WIREGATE_SHUTDOWN_FLUSH_SECS");
        override_u64(&mut cfg.supervisor.shutdown_force_exit_secs, "WIREGATE_SHUTDOWN_FORCE_EXIT_SECS");

        cfg.pacer.clamp_floors();
        cfg
    }
}

/// Store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sqlx connection string for the row store.
    pub database_url: String,
    /// Base directory for per-account auth scratch directories.
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://wiregate.db?mode=rwc".into(),
            data_dir: "./data".into(),
        }
    }
}

/// Send pacing and duplicate suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    /// Minimum gap between two sends on one account. Hard floor of 3s.
    pub min_interval_secs: u64,
    /// Rolling-hour send cap per account.
    pub max_per_hour: u32,
    /// Local-calendar-day send cap per account.
    pub max_per_day: u32,
    /// Upper bound of the uniform jitter added to any non-zero delay.
    pub jitter_max_ms: u64,
    /// Window in which an identical (account, peer, body) send is rejected.
    pub dup_window_secs: u64,
    /// Bound on the duplicate-guard map.
    pub dup_capacity: usize,
}

impl PacerConfig {
    pub const MIN_INTERVAL_FLOOR_SECS: u64 = 3;

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn dup_window(&self) -> Duration {
        Duration::from_secs(self.dup_window_secs)
    }

    /// The interval floor exists so an operator cannot configure the gateway
    /// into a machine-gun send pattern.
    fn clamp_floors(&mut self) {
        if self.min_interval_secs < Self::MIN_INTERVAL_FLOOR_SECS {
            warn!(
                configured = self.min_interval_secs,
                floor = Self::MIN_INTERVAL_FLOOR_SECS,
                "min send interval below floor, clamping"
            );
            self.min_interval_secs = Self::MIN_INTERVAL_FLOOR_SECS;
        }
    }
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 5,
            max_per_hour: 60,
            max_per_day: 500,
            jitter_max_ms: 2_000,
            dup_window_secs: 60,
            dup_capacity: 10_000,
        }
    }
}

/// Webhook delivery worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub tick_interval_secs: u64,
    pub batch_size: u32,
    /// Default retry budget; per-subscription overrides win.
    pub max_retries: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// A `processing` row untouched for longer than this is considered
    /// abandoned and reset to `failed`.
    pub staleness_secs: u64,
}

impl WebhookConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 3,
            batch_size: 10,
            max_retries: 5,
            base_backoff_secs: 2,
            max_backoff_secs: 60,
            staleness_secs: 300,
        }
    }
}

/// In-process cache bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1_capacity: usize,
    pub l1_ttl_secs: u64,
    /// Durable wire-message retention. Distinct from the L1 TTL: this is the
    /// resend horizon, not the cache recency bound.
    pub retention_days: u64,
    pub lid_capacity: usize,
}

impl CacheConfig {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1_000,
            l1_ttl_secs: 600,
            retention_days: 7,
            lid_capacity: 10_000,
        }
    }
}

/// Supervisor cadence and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub keepalive_url: Option<String>,
    pub keepalive_interval_secs: u64,
    pub memory_warn_mb: u64,
    pub memory_critical_mb: u64,
    /// At most this many accounts connect per stagger window.
    pub stagger_max_connects: u32,
    pub stagger_window_secs: u64,
    pub stagger_gap_min_secs: u64,
    pub stagger_gap_max_secs: u64,
    pub presence_refresh_min_secs: u64,
    pub presence_refresh_max_secs: u64,
    /// An ownership lock older than this may be stolen.
    pub stale_lock_secs: u64,
    pub auth_sync_interval_secs: u64,
    pub debounce_quiet_secs: u64,
    pub debounce_floor_secs: u64,
    pub shutdown_flush_secs: u64,
    pub shutdown_force_exit_secs: u64,
}

impl SupervisorConfig {
    pub fn stale_lock(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    pub fn auth_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auth_sync_interval_secs)
    }

    pub fn shutdown_flush(&self) -> Duration {
        Duration::from_secs(self.shutdown_flush_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            keepalive_url: None,
            keepalive_interval_secs: 600,
            memory_warn_mb: 400,
            memory_critical_mb: 700,
            stagger_max_connects: 3,
            stagger_window_secs: 600,
            stagger_gap_min_secs: 30,
            stagger_gap_max_secs: 60,
            presence_refresh_min_secs: 1_800,
            presence_refresh_max_secs: 3_600,
            stale_lock_secs: 120,
            auth_sync_interval_secs: 300,
            debounce_quiet_secs: 15,
            debounce_floor_secs: 30,
            shutdown_flush_secs: 10,
            shutdown_force_exit_secs: 30,
        }
    }
}

// ── Env override helpers ────────────────────────────────────────────────────

fn override_string(slot: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var)
        && !value.is_empty()
    {
        *slot = value;
    }
}

fn override_opt_string(slot: &mut Option<String>, var: &str) {
    if let Ok(value) = std::env::var(var)
        && !value.is_empty()
    {
        *slot = Some(value);
    }
}

fn override_u64(slot: &mut u64, var: &str) {
    override_parsed(slot, var);
}

fn override_u32(slot: &mut u32, var: &str) {
    override_parsed(slot, var);
}

fn override_usize(slot: &mut usize, var: &str) {
    override_parsed(slot, var);
}

fn override_parsed<T: std::str::FromStr + Copy>(slot: &mut T, var: &str) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(var, raw, "ignoring unparseable config override"),
    }
}
