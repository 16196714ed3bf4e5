//! Service wiring and the run loop.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Result,
    tokio::sync::Notify,
    tracing::{error, info, warn},
};

use {
    wiregate_auto_reply::{AutoReplyEngine, AutoReplyHook, EchoAdapter, LlmAdapter, ReplySender},
    wiregate_config::GatewayConfig,
    wiregate_msgcache::MessageCache,
    wiregate_pacer::{DuplicateGuard, Pacer},
    wiregate_protocol::{ProtocolEngine, SidecarEngine, WireCodec, sidecar},
    wiregate_router::{InboundRouter, LidMap},
    wiregate_runtime::{Services, Supervisor},
    wiregate_store::{AccountStore, QueueStore, WebhookStore, WireMessageStore},
    wiregate_vault::SessionVault,
    wiregate_webhooks::{SubscriptionService, WebhookWorker},
};

/// Build every service, start the supervisor and the delivery worker, and
/// run until SIGINT/SIGTERM.
pub async fn run(config: GatewayConfig, protocol_host: Option<String>) -> Result<()> {
    let pool = wiregate_store::open_pool(&config.store.database_url).await?;
    let accounts = AccountStore::with_pool(pool.clone());
    let webhooks = WebhookStore::with_pool(pool.clone());
    let queue = QueueStore::with_pool(pool.clone());
    let wire_store = WireMessageStore::with_pool(pool);

    let vault = SessionVault::new(
        accounts.clone(),
        PathBuf::from(&config.store.data_dir),
        config.supervisor.stale_lock_secs as i64 * 1000,
    );

    let msgcache = Arc::new(MessageCache::<wiregate_protocol::WireMessage>::new(
        wire_store,
        config.cache.l1_capacity,
        config.cache.l1_ttl(),
    ));

    // Protocol host bridge, answering resend requests from the cache.
    let engine = Arc::new(SidecarEngine::new(
        protocol_host.unwrap_or_else(|| sidecar::DEFAULT_HOST_URL.to_string()),
    ));
    {
        let cache = Arc::clone(&msgcache);
        engine
            .set_resend_lookup(Arc::new(move |account_id, message_id| {
                let cache = Arc::clone(&cache);
                Box::pin(async move {
                    match cache.get(&account_id, &message_id).await {
                        Ok(message) => message.to_stored().ok(),
                        Err(_) => None,
                    }
                })
            }))
            .await;
    }

    // Webhook fan-out and its worker.
    let wake = Arc::new(Notify::new());
    let subscriptions = Arc::new(SubscriptionService::new(
        webhooks,
        queue.clone(),
        config.webhooks.max_retries,
        Arc::clone(&wake),
    ));
    let worker = WebhookWorker::new(queue, config.webhooks.clone(), wake);
    worker.start().await?;

    let router = Arc::new(InboundRouter::new(
        Arc::new(LidMap::new(config.cache.lid_capacity)),
        Arc::clone(&subscriptions),
    ));

    let services = Arc::new(Services {
        engine: Arc::clone(&engine) as Arc<dyn ProtocolEngine>,
        accounts,
        vault,
        pacer: Arc::new(Pacer::new(config.pacer.clone())),
        duplicates: Arc::new(DuplicateGuard::new(
            config.pacer.dup_window(),
            config.pacer.dup_capacity,
        )),
        msgcache,
        router: Arc::clone(&router),
        config: config.clone(),
    });

    let supervisor = Supervisor::new(services);

    // Auto-reply is wired through the supervisor's paced send path.
    let adapters: Vec<Arc<dyn LlmAdapter>> = vec![Arc::new(EchoAdapter)];
    let reply_engine = AutoReplyEngine::new(adapters, "You are a concise assistant.");
    router.set_hook(Arc::new(AutoReplyHook::new(
        reply_engine,
        Arc::clone(&supervisor) as Arc<dyn ReplySender>,
    )));

    supervisor.start().await?;
    info!("gateway up");

    wait_for_shutdown_signal().await;
    info!("termination signal received");

    // Force-exit backstop: a hung flush must not keep the process alive.
    let force_exit = config.supervisor.shutdown_force_exit_secs;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(force_exit)).await;
        error!("graceful shutdown overran {force_exit}s, forcing exit");
        std::process::exit(1);
    });

    supervisor.shutdown().await;
    worker.stop().await;
    info!("goodbye");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                return;
            },
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
