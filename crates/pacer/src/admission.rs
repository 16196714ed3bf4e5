//! Send admission: interval floor, rolling-hour window, daily bucket.

use std::{collections::VecDeque, time::Duration};

use {
    chrono::{Local, NaiveDate, Timelike},
    dashmap::DashMap,
    rand::Rng,
    tokio::{sync::watch, time::Instant},
    tracing::debug,
};

use {
    wiregate_common::{GatewayError, Result},
    wiregate_config::PacerConfig,
};

const HOUR: Duration = Duration::from_secs(3600);
/// Hold granularity while the rolling-hour window is saturated.
const HOURLY_HOLD_SECS: u64 = 60;

/// Per-account rate bookkeeping. Recreated on process start, never persisted.
struct AccountRate {
    last_send: Option<Instant>,
    window: VecDeque<Instant>,
    day_key: NaiveDate,
    day_count: u32,
}

impl AccountRate {
    fn new(today: NaiveDate) -> Self {
        Self {
            last_send: None,
            window: VecDeque::new(),
            day_key: today,
            day_count: 0,
        }
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if self.day_key != today {
            self.day_key = today;
            self.day_count = 0;
        }
    }

    fn prune_window(&mut self, now: Instant) {
        while self
            .window
            .front()
            .is_some_and(|&t| now.duration_since(t) >= HOUR)
        {
            self.window.pop_front();
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ready,
    /// Below the interval floor; come back after this long.
    After(Duration),
    /// Rolling-hour cap reached.
    HourlyCapped { retry_after: u64 },
    /// Daily cap reached; opens at local midnight.
    DailyCapped { retry_after: u64 },
}

/// The admission gate all outbound sends pass through.
///
/// Callers serialize per account (the send path holds the account's FIFO
/// lock), so check-then-record has no interleaving to worry about. The
/// recorded timestamp is committed only after the transport accepted the
/// frame.
pub struct Pacer {
    config: PacerConfig,
    states: DashMap<String, AccountRate>,
}

impl Pacer {
    #[must_use]
    pub fn new(config: PacerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Classify the account's current admission state.
    #[must_use]
    pub fn check(&self, account_id: &str) -> Admission {
        self.check_at(account_id, Instant::now(), local_today(), secs_to_local_midnight())
    }

    fn check_at(
        &self,
        account_id: &str,
        now: Instant,
        today: NaiveDate,
        secs_to_midnight: u64,
    ) -> Admission {
        let mut state = self
            .states
            .entry(account_id.to_string())
            .or_insert_with(|| AccountRate::new(today));

        state.roll_day(today);
        state.prune_window(now);

        if state.day_count >= self.config.max_per_day {
            return Admission::DailyCapped {
                retry_after: secs_to_midnight.max(1),
            };
        }

        if state.window.len() >= self.config.max_per_hour as usize {
            return Admission::HourlyCapped {
                retry_after: HOURLY_HOLD_SECS,
            };
        }

        if let Some(last) = state.last_send {
            let elapsed = now.duration_since(last);
            let floor = self.config.min_interval();
            if elapsed < floor {
                return Admission::After(self.jittered(floor - elapsed));
            }
        }

        Admission::Ready
    }

    /// Block until admitted or rejected. Hourly saturation holds; the daily
    /// cap is a caller-visible rejection. A shutdown signal interrupts any
    /// wait immediately.
    pub async fn admit(
        &self,
        account_id: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let wait = match self.check(account_id) {
                Admission::Ready => return Ok(()),
                Admission::After(delay) => delay,
                Admission::HourlyCapped { .. } => {
                    debug!(account_id, "hour window saturated, holding send");
                    self.jittered(Duration::from_secs(HOURLY_HOLD_SECS))
                },
                Admission::DailyCapped { retry_after } => {
                    return Err(GatewayError::DailyCap { retry_after });
                },
            };

            tokio::select! {
                () = tokio::time::sleep(wait) => {},
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(GatewayError::Shutdown);
                    }
                },
            }
        }
    }

    /// Non-blocking admission: caps surface as errors instead of holds.
    /// Only the interval floor is waited out.
    pub async fn try_admit(&self, account_id: &str) -> Result<()> {
        loop {
            match self.check(account_id) {
                Admission::Ready => return Ok(()),
                Admission::After(delay) => tokio::time::sleep(delay).await,
                Admission::HourlyCapped { retry_after } => {
                    return Err(GatewayError::HourlyCap { retry_after });
                },
                Admission::DailyCapped { retry_after } => {
                    return Err(GatewayError::DailyCap { retry_after });
                },
            }
        }
    }

    /// Commit one accepted send into the hour window and day bucket.
    pub fn record_send(&self, account_id: &str) {
        self.record_send_at(account_id, Instant::now(), local_today());
    }

    fn record_send_at(&self, account_id: &str, now: Instant, today: NaiveDate) {
        let mut state = self
            .states
            .entry(account_id.to_string())
            .or_insert_with(|| AccountRate::new(today));
        state.roll_day(today);
        state.prune_window(now);
        state.last_send = Some(now);
        state.window.push_back(now);
        state.day_count += 1;
    }

    /// Sends recorded today for the account.
    #[must_use]
    pub fn day_count(&self, account_id: &str) -> u32 {
        self.states
            .get(account_id)
            .map(|s| s.day_count)
            .unwrap_or(0)
    }

    fn jittered(&self, base: Duration) -> Duration {
        let jitter = rand::rng().random_range(0..=self.config.jitter_max_ms);
        base + Duration::from_millis(jitter)
    }
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Seconds until the next local midnight.
fn secs_to_local_midnight() -> u64 {
    let now = Local::now();
    let remaining = 86_400
        - u64::from(now.hour()) * 3600
        - u64::from(now.minute()) * 60
        - u64::from(now.second());
    remaining.max(1)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn pacer() -> Pacer {
        Pacer::new(PacerConfig {
            jitter_max_ms: 0,
            ..PacerConfig::default()
        })
    }

    fn today() -> NaiveDate {
        local_today()
    }

    #[test]
    fn first_send_is_ready() {
        let pacer = pacer();
        assert_eq!(
            pacer.check_at("a", Instant::now(), today(), 1000),
            Admission::Ready
        );
    }

    #[test]
    fn interval_floor_delays_back_to_back_sends() {
        let pacer = pacer();
        let t0 = Instant::now();
        pacer.record_send_at("a", t0, today());

        match pacer.check_at("a", t0 + Duration::from_secs(2), today(), 1000) {
            Admission::After(delay) => assert_eq!(delay, Duration::from_secs(3)),
            other => panic!("unexpected: {other:?}"),
        }

        assert_eq!(
            pacer.check_at("a", t0 + Duration::from_secs(5), today(), 1000),
            Admission::Ready
        );
    }

    #[test]
    fn sixty_sends_in_an_hour_saturate_the_window() {
        let pacer = pacer();
        let t0 = Instant::now();
        // 60 sends within 59 seconds.
        for i in 0..60u64 {
            pacer.record_send_at("a", t0 + Duration::from_millis(i * 983), today());
        }

        let t_check = t0 + Duration::from_secs(70);
        match pacer.check_at("a", t_check, today(), 1000) {
            Admission::HourlyCapped { retry_after } => assert_eq!(retry_after, 60),
            other => panic!("unexpected: {other:?}"),
        }

        // Once the window has moved past the first send, admission reopens.
        let t_later = t0 + HOUR + Duration::from_secs(1);
        assert_eq!(pacer.check_at("a", t_later, today(), 1000), Admission::Ready);
    }

    #[test]
    fn daily_cap_reports_seconds_to_midnight() {
        let pacer = Pacer::new(PacerConfig {
            max_per_day: 3,
            jitter_max_ms: 0,
            ..PacerConfig::default()
        });
        let t0 = Instant::now();
        for i in 0..3u64 {
            // Spread past the hour window so only the day bucket trips.
            pacer.record_send_at("a", t0 + Duration::from_secs(i * 3700), today());
        }

        match pacer.check_at("a", t0 + Duration::from_secs(4 * 3700), today(), 12_345) {
            Admission::DailyCapped { retry_after } => assert_eq!(retry_after, 12_345),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn day_bucket_rolls_over_on_date_change() {
        let pacer = Pacer::new(PacerConfig {
            max_per_day: 1,
            jitter_max_ms: 0,
            ..PacerConfig::default()
        });
        let t0 = Instant::now();
        let d0 = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();

        pacer.record_send_at("a", t0, d0);
        assert!(matches!(
            pacer.check_at("a", t0 + Duration::from_secs(2 * 3600), d0, 1000),
            Admission::DailyCapped { .. }
        ));

        // New date, fresh bucket.
        assert_eq!(
            pacer.check_at("a", t0 + Duration::from_secs(2 * 3600), d1, 1000),
            Admission::Ready
        );
        assert_eq!(pacer.day_count("a"), 0);
    }

    #[test]
    fn accounts_do_not_share_state() {
        let pacer = pacer();
        let t0 = Instant::now();
        pacer.record_send_at("a", t0, today());

        assert_eq!(pacer.check_at("b", t0, today(), 1000), Admission::Ready);
        assert_eq!(pacer.day_count("a"), 1);
        assert_eq!(pacer.day_count("b"), 0);
    }

    #[tokio::test]
    async fn daily_cap_is_a_rejection_not_a_hold() {
        let pacer = Pacer::new(PacerConfig {
            max_per_day: 0,
            jitter_max_ms: 0,
            ..PacerConfig::default()
        });
        let (_tx, mut rx) = watch::channel(false);

        match pacer.admit("a", &mut rx).await {
            Err(GatewayError::DailyCap { retry_after }) => assert!(retry_after >= 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_pending_wait() {
        let pacer = pacer();
        pacer.record_send("a");

        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let p = pacer;
            p.admit("a", &mut rx).await
        });

        tx.send(true).unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(GatewayError::Shutdown)));
    }

    #[tokio::test]
    async fn try_admit_surfaces_hourly_cap() {
        let pacer = Pacer::new(PacerConfig {
            max_per_hour: 1,
            jitter_max_ms: 0,
            min_interval_secs: 3,
            ..PacerConfig::default()
        });
        pacer.record_send("a");

        match pacer.try_admit("a").await {
            Err(GatewayError::HourlyCap { retry_after }) => assert_eq!(retry_after, 60),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
