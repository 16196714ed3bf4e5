//! The delivery worker loop.
//!
//! One instance per process. Claims due jobs through the store's
//! conditional update, delivers them, and applies the backoff and
//! dead-letter policy. Recovers jobs a crashed worker left in `processing`.

use std::{sync::Arc, time::Duration};

use {
    tokio::{
        sync::{Mutex, Notify, RwLock},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use {
    wiregate_common::time::now_ms,
    wiregate_config::WebhookConfig,
    wiregate_store::{DeliveryJobRow, QueueStore},
};

use crate::delivery::{Deliverer, DeliveryOutcome};

/// The delivery worker.
pub struct WebhookWorker {
    queue: QueueStore,
    deliverer: Deliverer,
    config: WebhookConfig,
    wake: Arc<Notify>,
    running: RwLock<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WebhookWorker {
    #[must_use]
    pub fn new(queue: QueueStore, config: WebhookConfig, wake: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            queue,
            deliverer: Deliverer::new(),
            config,
            wake,
            running: RwLock::new(false),
            handle: Mutex::new(None),
        })
    }

    /// The notifier enqueuers use to cut the tick short.
    #[must_use]
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Recover stuck jobs, then start the loop.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let recovered = self
            .queue
            .recover_stuck(self.config.staleness().as_millis() as i64)
            .await?;
        if recovered > 0 {
            info!(recovered, "recovered stuck delivery jobs from a previous run");
        }

        *self.running.write().await = true;

        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            worker.run_loop().await;
        });
        *self.handle.lock().await = Some(handle);
        info!("webhook delivery worker started");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake.notify_one();

        let mut handle = self.handle.lock().await;
        if let Some(h) = handle.take() {
            h.abort();
        }
        info!("webhook delivery worker stopped");
    }

    async fn run_loop(self: &Arc<Self>) {
        let mut ticks: u64 = 0;
        loop {
            if !*self.running.read().await {
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.tick_interval()) => {},
                () = self.wake.notified() => {
                    debug!("worker woken by enqueue");
                },
            }

            if !*self.running.read().await {
                break;
            }

            ticks += 1;
            // Periodic stuck-job sweep alongside the start-time one.
            if ticks % 100 == 0
                && let Err(err) = self
                    .queue
                    .recover_stuck(self.config.staleness().as_millis() as i64)
                    .await
            {
                warn!(error = %err, "stuck-job recovery failed");
            }
            // Terminal rows are kept a week for inspection, then dropped.
            if ticks % 1000 == 0
                && let Err(err) = self
                    .queue
                    .prune_terminal_before(now_ms() - 7 * 24 * 3600 * 1000)
                    .await
            {
                warn!(error = %err, "terminal-row prune failed");
            }

            if let Err(err) = self.process_due().await {
                // Background task: log and keep going, never crash.
                error!(error = %err, "delivery tick failed");
            }
        }
    }

    async fn process_due(self: &Arc<Self>) -> anyhow::Result<()> {
        let due = self.queue.due_batch(self.config.batch_size).await?;
        for job in due {
            // The conditional update is the claim; losing it means another
            // worker (or a racing tick) got there first.
            if !self.queue.claim(&job.id).await? {
                continue;
            }
            let attempt = job.attempt_count + 1;
            self.attempt(job, attempt).await;
        }
        Ok(())
    }

    async fn attempt(self: &Arc<Self>, job: DeliveryJobRow, attempt: u32) {
        debug!(job_id = %job.id, attempt, url = %job.webhook_url, "attempting delivery");

        let outcome = self.deliverer.deliver(&job, false).await;
        let result = match outcome {
            DeliveryOutcome::Success { status } => {
                debug!(job_id = %job.id, status, "delivered");
                self.queue.mark_success(&job.id, status).await
            },
            DeliveryOutcome::Permanent { status } => {
                warn!(job_id = %job.id, status, "permanent subscriber error, dead-lettering");
                self.queue
                    .mark_dead_letter(&job.id, &format!("permanent: HTTP {status}"))
                    .await
            },
            DeliveryOutcome::TooLarge => {
                warn!(job_id = %job.id, "payload over size limit, dead-lettering");
                self.queue
                    .mark_dead_letter(&job.id, "payload too large (synthesized 413)")
                    .await
            },
            DeliveryOutcome::Retryable { error } => {
                if attempt >= job.max_retries {
                    warn!(job_id = %job.id, attempt, error, "retry budget exhausted, dead-lettering");
                    self.queue
                        .mark_dead_letter(&job.id, &format!("retries exhausted: {error}"))
                        .await
                } else {
                    let backoff = self.backoff_for(attempt);
                    debug!(job_id = %job.id, attempt, backoff_secs = backoff.as_secs(), error, "retrying later");
                    self.queue
                        .mark_failed(&job.id, now_ms() + backoff.as_millis() as i64, &error)
                        .await
                }
            },
        };

        if let Err(err) = result {
            error!(job_id = %job.id, error = %err, "failed to record delivery outcome");
        }
    }

    /// `min(base · 2^(attempt-1), max)`.
    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.config.base_backoff_secs;
        let capped_exp = attempt.saturating_sub(1).min(16);
        let secs = base.saturating_mul(1u64 << capped_exp);
        Duration::from_secs(secs.min(self.config.max_backoff_secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        wiregate_common::EventKind,
        wiregate_store::{JobStatus, WebhookStore},
    };

    use {super::*, crate::subscriptions::SubscriptionService};

    struct Rig {
        worker: Arc<WebhookWorker>,
        service: SubscriptionService,
        queue: QueueStore,
        webhooks: WebhookStore,
    }

    async fn rig(config: WebhookConfig) -> Rig {
        let pool = wiregate_store::open_pool("sqlite::memory:").await.unwrap();
        let queue = QueueStore::with_pool(pool.clone());
        let webhooks = WebhookStore::with_pool(pool);
        let wake = Arc::new(Notify::new());
        let worker = WebhookWorker::new(queue.clone(), config, Arc::clone(&wake));
        let service = SubscriptionService::new(webhooks.clone(), queue.clone(), 5, wake);
        Rig {
            worker,
            service,
            queue,
            webhooks,
        }
    }

    fn fast_config() -> WebhookConfig {
        WebhookConfig {
            tick_interval_secs: 1,
            base_backoff_secs: 1,
            max_backoff_secs: 4,
            ..WebhookConfig::default()
        }
    }

    async fn wait_for_terminal(queue: &QueueStore, job_id: &str, deadline_secs: u64) -> DeliveryJobRow {
        for _ in 0..(deadline_secs * 10) {
            let job = queue.get(job_id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn backoff_schedule_is_exponential_and_capped() {
        let pool = wiregate_store::open_pool("sqlite::memory:").await.unwrap();
        let worker = WebhookWorker::new(
            QueueStore::with_pool(pool),
            WebhookConfig::default(),
            Arc::new(Notify::new()),
        );

        assert_eq!(worker.backoff_for(1), Duration::from_secs(2));
        assert_eq!(worker.backoff_for(2), Duration::from_secs(4));
        assert_eq!(worker.backoff_for(3), Duration::from_secs(8));
        assert_eq!(worker.backoff_for(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn at_least_once_with_backoff_until_success() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let rig = rig(fast_config()).await;
        rig.webhooks
            .create("acc", &format!("{}/hook", server.url()), Some("s"), None, true, None)
            .await
            .unwrap();
        rig.worker.start().await.unwrap();

        rig.service
            .enqueue_event(
                "acc",
                EventKind::Message,
                &serde_json::json!({"event": "message", "message_id": "M1"}),
            )
            .await
            .unwrap();
        let job_id = rig.queue.due_batch(10).await.unwrap()[0].id.clone();

        // Let the subscriber fail twice, then start answering 200.
        for _ in 0..200 {
            let job = rig.queue.get(&job_id).await.unwrap().unwrap();
            if job.attempt_count >= 2 && job.status == JobStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        failing.assert_async().await;
        failing.remove_async().await;
        let succeeding = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let job = wait_for_terminal(&rig.queue, &job_id, 20).await;
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.attempt_count, 3);
        assert_eq!(job.response_status, Some(200));

        succeeding.assert_async().await;
        rig.worker.stop().await;
    }

    #[tokio::test]
    async fn permanent_4xx_dead_letters_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let gone = server
            .mock("POST", "/hook")
            .with_status(410)
            .expect(1)
            .create_async()
            .await;

        let rig = rig(fast_config()).await;
        rig.webhooks
            .create("acc", &format!("{}/hook", server.url()), None, None, true, None)
            .await
            .unwrap();
        rig.worker.start().await.unwrap();

        rig.service
            .enqueue_event("acc", EventKind::Message, &serde_json::json!({"event": "message"}))
            .await
            .unwrap();
        let job_id = rig.queue.due_batch(10).await.unwrap()[0].id.clone();

        let job = wait_for_terminal(&rig.queue, &job_id, 10).await;
        assert_eq!(job.status, JobStatus::DeadLetter);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.response_status, None);
        assert!(job.last_error.unwrap().contains("410"));

        gone.assert_async().await;
        rig.worker.stop().await;
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_dead_letters() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(500)
            .expect_at_least(2)
            .create_async()
            .await;

        let rig = rig(WebhookConfig {
            tick_interval_secs: 1,
            base_backoff_secs: 1,
            max_backoff_secs: 1,
            ..WebhookConfig::default()
        })
        .await;
        rig.webhooks
            .create(
                "acc",
                &format!("{}/hook", server.url()),
                None,
                None,
                true,
                Some(2),
            )
            .await
            .unwrap();
        rig.worker.start().await.unwrap();

        rig.service
            .enqueue_event("acc", EventKind::Message, &serde_json::json!({"event": "message"}))
            .await
            .unwrap();
        let job_id = rig.queue.due_batch(10).await.unwrap()[0].id.clone();

        let job = wait_for_terminal(&rig.queue, &job_id, 20).await;
        assert_eq!(job.status, JobStatus::DeadLetter);
        assert_eq!(job.attempt_count, 2);
        assert!(job.last_error.unwrap().contains("retries exhausted"));
        rig.worker.stop().await;
    }

    #[tokio::test]
    async fn start_recovers_stuck_jobs() {
        let rig = rig(fast_config()).await;
        rig.webhooks
            .create("acc", "https://unused.example/h", None, None, true, None)
            .await
            .unwrap();
        rig.service
            .enqueue_event("acc", EventKind::Message, &serde_json::json!({}))
            .await
            .unwrap();

        // Simulate a crash mid-attempt: claimed but never finished.
        let job_id = rig.queue.due_batch(10).await.unwrap()[0].id.clone();
        assert!(rig.queue.claim(&job_id).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        // A zero staleness window makes the row immediately recoverable.
        let config = WebhookConfig {
            staleness_secs: 0,
            ..fast_config()
        };
        let worker = WebhookWorker::new(rig.queue.clone(), config, Arc::new(Notify::new()));
        worker.start().await.unwrap();

        let job = rig.queue.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("recovered"));
        worker.stop().await;
        rig.worker.stop().await;
    }
}
