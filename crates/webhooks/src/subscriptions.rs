//! Subscription lookup and event fan-out into the queue.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    anyhow::Result,
    tokio::sync::{Mutex, Notify},
    tracing::debug,
};

use {
    wiregate_common::EventKind,
    wiregate_store::{NewDeliveryJob, QueueStore, WebhookRow, WebhookStore},
};

/// How long a loaded subscription list stays warm.
const CACHE_TTL: Duration = Duration::from_secs(30);

/// Loads subscriptions (with a short-TTL cache) and enqueues delivery jobs.
pub struct SubscriptionService {
    webhooks: WebhookStore,
    queue: QueueStore,
    default_max_retries: u32,
    cache: Mutex<HashMap<String, (Instant, Vec<WebhookRow>)>>,
    wake: Arc<Notify>,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(
        webhooks: WebhookStore,
        queue: QueueStore,
        default_max_retries: u32,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            webhooks,
            queue,
            default_max_retries,
            cache: Mutex::new(HashMap::new()),
            wake,
        }
    }

    /// Fan an event out to every matching subscription. Returns the number
    /// of jobs enqueued; the worker is woken when it is non-zero.
    pub async fn enqueue_event(
        &self,
        account_id: &str,
        kind: EventKind,
        payload: &serde_json::Value,
    ) -> Result<usize> {
        let subscriptions = self.active_subscriptions(account_id).await?;

        let mut enqueued = 0;
        for subscription in &subscriptions {
            let selected = subscription
                .events
                .iter()
                .any(|entry| kind.selected_by(entry));
            if !selected {
                continue;
            }

            self.queue
                .enqueue(NewDeliveryJob {
                    account_id: account_id.to_string(),
                    webhook_id: Some(subscription.id.clone()),
                    webhook_url: subscription.url.clone(),
                    webhook_secret: subscription.secret.clone(),
                    payload: payload.clone(),
                    max_retries: subscription.max_retries.unwrap_or(self.default_max_retries),
                })
                .await?;
            enqueued += 1;
        }

        if enqueued > 0 {
            debug!(account_id, kind = kind.as_str(), enqueued, "webhook jobs enqueued");
            self.wake.notify_one();
        }
        Ok(enqueued)
    }

    /// Drop the cached list after a subscription change.
    pub async fn invalidate(&self, account_id: &str) {
        self.cache.lock().await.remove(account_id);
    }

    async fn active_subscriptions(&self, account_id: &str) -> Result<Vec<WebhookRow>> {
        {
            let cache = self.cache.lock().await;
            if let Some((loaded_at, rows)) = cache.get(account_id)
                && loaded_at.elapsed() < CACHE_TTL
            {
                return Ok(rows.clone());
            }
        }

        let rows = self.webhooks.list_active_for_account(account_id).await?;
        self.cache
            .lock()
            .await
            .insert(account_id.to_string(), (Instant::now(), rows.clone()));
        Ok(rows)
    }
}
