//! The lifecycle supervisor: owns every runtime in the process.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    dashmap::DashMap,
    tokio::{
        sync::{Mutex, watch},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use {
    wiregate_auto_reply::ReplySender,
    wiregate_common::{AccountStatus, GatewayError, Result},
    wiregate_pacer::StaggerGate,
};

use crate::{runtime::AccountRuntime, services::Services};

/// Owns the set of account runtimes and the periodic chores.
pub struct Supervisor {
    services: Arc<Services>,
    runtimes: DashMap<String, Arc<AccountRuntime>>,
    shutdown_tx: watch::Sender<bool>,
    stagger: StaggerGate,
    chores: Mutex<Vec<JoinHandle<()>>>,
    defer_connects: AtomicBool,
}

impl Supervisor {
    #[must_use]
    pub fn new(services: Arc<Services>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        let sup = &services.config.supervisor;
        let stagger = StaggerGate::new(
            sup.stagger_max_connects,
            std::time::Duration::from_secs(sup.stagger_window_secs),
            std::time::Duration::from_secs(sup.stagger_gap_min_secs),
            std::time::Duration::from_secs(sup.stagger_gap_max_secs),
        );

        Arc::new(Self {
            services,
            runtimes: DashMap::new(),
            shutdown_tx,
            stagger,
            chores: Mutex::new(Vec::new()),
            defer_connects: AtomicBool::new(false),
        })
    }

    /// Restore all accounts: those with a usable blob connect under the
    /// stagger policy; the rest are marked as needing pairing and wait for
    /// an explicit request.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let accounts = self.services.accounts.list().await?;
        let mut restorable = Vec::new();

        for account in accounts {
            let usable = self
                .services
                .vault
                .has_usable_blob(&account.id)
                .await
                .unwrap_or(false);
            if usable {
                restorable.push(account.id);
            } else {
                let _ = self
                    .services
                    .accounts
                    .update_status(&account.id, AccountStatus::NeedsQr)
                    .await;
            }
        }

        info!(count = restorable.len(), "restoring saved accounts");

        let supervisor = Arc::clone(self);
        let connector = tokio::spawn(async move {
            let mut shutdown = supervisor.shutdown_tx.subscribe();
            for account_id in restorable {
                let wait = supervisor.stagger.reserve().await;
                if wait > std::time::Duration::ZERO {
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {},
                        _ = shutdown.changed() => return,
                    }
                }
                if *shutdown.borrow() {
                    return;
                }
                while supervisor.defer_connects.load(Ordering::Relaxed) {
                    debug!("memory pressure critical, deferring connects");
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                }
                if let Err(err) = supervisor.start_account(&account_id).await {
                    warn!(account_id, kind = err.kind(), "account restore failed");
                }
            }
        });
        self.chores.lock().await.push(connector);

        self.spawn_chores().await;
        Ok(())
    }

    /// Start (or return) the runtime for one account.
    pub async fn start_account(&self, account_id: &str) -> Result<Arc<AccountRuntime>> {
        // Clone out of the map before touching it again; holding a map guard
        // across an await would wedge the shard.
        let existing = self.get(account_id);
        if let Some(existing) = existing {
            if !matches!(
                existing.status(),
                AccountStatus::Disconnected | AccountStatus::Error
            ) {
                return Ok(existing);
            }
            // Terminal runtime: replace it with a fresh run.
            existing.stop().await;
            self.runtimes.remove(account_id);
        }

        let exists = self
            .services
            .accounts
            .get(account_id)
            .await
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))?
            .is_some();
        if !exists {
            return Err(GatewayError::NotFound(format!("account {account_id}")));
        }

        let runtime = AccountRuntime::new(
            account_id.to_string(),
            Arc::clone(&self.services),
            self.shutdown_tx.subscribe(),
        );
        runtime.start().await?;
        self.runtimes
            .insert(account_id.to_string(), Arc::clone(&runtime));
        Ok(runtime)
    }

    #[must_use]
    pub fn get(&self, account_id: &str) -> Option<Arc<AccountRuntime>> {
        self.runtimes.get(account_id).map(|r| Arc::clone(r.value()))
    }

    /// Tear down and restart one account's connection.
    pub async fn reconnect_account(&self, account_id: &str) -> Result<Arc<AccountRuntime>> {
        if let Some((_, runtime)) = self.runtimes.remove(account_id) {
            runtime.stop().await;
        }
        self.start_account(account_id).await
    }

    /// Stop the runtime and erase the account everywhere.
    pub async fn delete_account(&self, account_id: &str) -> Result<()> {
        if let Some((_, runtime)) = self.runtimes.remove(account_id) {
            // Best-effort remote logout so the phone drops the linked device.
            if let Err(err) = runtime.logout().await {
                debug!(account_id, kind = err.kind(), "logout before delete skipped");
            }
            runtime.stop().await;
        }
        self.services
            .vault
            .clear(account_id)
            .await
            .map_err(|e| GatewayError::internal(format!("auth clear failed: {e}")))?;
        self.services
            .accounts
            .delete(account_id)
            .await
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// The outbound API surface: paced, typed, duplicate-checked.
    pub async fn send_text(&self, account_id: &str, to_digits: &str, body: &str) -> Result<String> {
        let runtime = self
            .get(account_id)
            .ok_or_else(|| GatewayError::NotFound(format!("account {account_id}")))?;
        runtime.send_text(to_digits, body).await
    }

    /// Graceful shutdown: signal everything, flush auth blobs under one
    /// combined deadline, then close sockets.
    pub async fn shutdown(&self) {
        info!("supervisor shutting down");
        let _ = self.shutdown_tx.send(true);

        let runtimes: Vec<Arc<AccountRuntime>> = self
            .runtimes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let flush_deadline = self.services.config.supervisor.shutdown_flush();
        let flushes = runtimes
            .iter()
            .map(|runtime| {
                let runtime = Arc::clone(runtime);
                async move {
                    if runtime.status() == AccountStatus::Ready
                        && let Err(err) = runtime.flush_auth().await
                    {
                        warn!(account_id = runtime.account_id(), error = %err, "final auth flush failed");
                    }
                }
            })
            .collect::<Vec<_>>();
        if tokio::time::timeout(flush_deadline, futures::future::join_all(flushes))
            .await
            .is_err()
        {
            warn!("auth flush deadline exceeded, closing anyway");
        }

        for runtime in runtimes {
            runtime.stop().await;
        }
        self.runtimes.clear();

        for chore in self.chores.lock().await.drain(..) {
            chore.abort();
        }
        info!("supervisor stopped");
    }

    // ── Periodic chores ─────────────────────────────────────────────────

    async fn spawn_chores(self: &Arc<Self>) {
        let mut chores = self.chores.lock().await;

        // Debounced auth sync for every Ready runtime.
        {
            let supervisor = Arc::clone(self);
            let interval = supervisor.services.config.supervisor.auth_sync_interval();
            chores.push(tokio::spawn(async move {
                let mut shutdown = supervisor.shutdown_tx.subscribe();
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(interval) => {},
                        _ = shutdown.changed() => return,
                    }
                    for entry in supervisor.runtimes.iter() {
                        if entry.status() == AccountStatus::Ready {
                            entry.request_auth_save();
                        }
                    }
                }
            }));
        }

        // Memory pressure probe.
        {
            let supervisor = Arc::clone(self);
            let warn_mb = supervisor.services.config.supervisor.memory_warn_mb;
            let critical_mb = supervisor.services.config.supervisor.memory_critical_mb;
            chores.push(tokio::spawn(async move {
                let mut shutdown = supervisor.shutdown_tx.subscribe();
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(std::time::Duration::from_secs(30)) => {},
                        _ = shutdown.changed() => return,
                    }
                    let Some(rss_mb) = current_rss_mb() else { continue };
                    if rss_mb >= critical_mb {
                        warn!(rss_mb, critical_mb, "memory critical, deferring new connects");
                        supervisor.defer_connects.store(true, Ordering::Relaxed);
                    } else {
                        if rss_mb >= warn_mb {
                            warn!(rss_mb, warn_mb, "memory above warning threshold");
                        }
                        supervisor.defer_connects.store(false, Ordering::Relaxed);
                    }
                }
            }));
        }

        // Wire-message retention and queue housekeeping.
        {
            let supervisor = Arc::clone(self);
            let retention = supervisor.services.config.cache.retention();
            chores.push(tokio::spawn(async move {
                let mut shutdown = supervisor.shutdown_tx.subscribe();
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(std::time::Duration::from_secs(3600)) => {},
                        _ = shutdown.changed() => return,
                    }
                    match supervisor.services.msgcache.prune(retention).await {
                        Ok(pruned) if pruned > 0 => {
                            debug!(pruned, "wire-message retention pass complete");
                        },
                        Ok(_) => {},
                        Err(err) => warn!(error = %err, "retention pass failed"),
                    }
                }
            }));
        }

        // Outbound keepalive for hosts that sleep idle processes.
        if let Some(url) = self.services.config.supervisor.keepalive_url.clone() {
            let supervisor = Arc::clone(self);
            let interval = supervisor.services.config.supervisor.keepalive_interval_secs;
            chores.push(tokio::spawn(async move {
                let mut shutdown = supervisor.shutdown_tx.subscribe();
                let client = reqwest::Client::new();
                loop {
                    let jittered = wiregate_pacer::stagger::reconnect_jitter(interval, interval + 60);
                    tokio::select! {
                        () = tokio::time::sleep(jittered) => {},
                        _ = shutdown.changed() => return,
                    }
                    match client
                        .get(&url)
                        .timeout(std::time::Duration::from_secs(10))
                        .send()
                        .await
                    {
                        Ok(response) => debug!(status = response.status().as_u16(), "keepalive ping"),
                        Err(err) => debug!(error = %err, "keepalive ping failed"),
                    }
                }
            }));
        }

        // Sweep runtimes that ended their run.
        {
            let supervisor = Arc::clone(self);
            chores.push(tokio::spawn(async move {
                let mut shutdown = supervisor.shutdown_tx.subscribe();
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(std::time::Duration::from_secs(60)) => {},
                        _ = shutdown.changed() => return,
                    }
                    let ended: Vec<String> = supervisor
                        .runtimes
                        .iter()
                        .filter(|entry| {
                            matches!(
                                entry.status(),
                                AccountStatus::Disconnected | AccountStatus::Error
                            )
                        })
                        .map(|entry| entry.account_id().to_string())
                        .collect();
                    for account_id in ended {
                        if let Some((_, runtime)) = supervisor.runtimes.remove(&account_id) {
                            runtime.stop().await;
                            debug!(account_id, "swept terminated runtime");
                        }
                    }
                }
            }));
        }
    }
}

/// Resident set size of this process in MB, if the platform reports it.
fn current_rss_mb() -> Option<u64> {
    use sysinfo::{ProcessesToUpdate, System};

    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory() / (1024 * 1024))
}

#[async_trait::async_trait]
impl ReplySender for Supervisor {
    async fn send_reply(&self, account_id: &str, to: &str, body: &str) -> Result<String> {
        self.send_text(account_id, to, body).await
    }
}
