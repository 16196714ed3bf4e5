//! Two-tier cache of recently seen wire messages.
//!
//! When the network requests a resend, the protocol library calls back into
//! [`MessageCache::get`]. A miss shows the recipient a permanent "waiting
//! for this message" gap, so every inbound message and every successful
//! outbound send lands here: L1 synchronously, the durable tier as a
//! fire-and-forget write.

use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

use {lru::LruCache, tracing::warn};

use {
    wiregate_common::{GatewayError, Result, time::now_ms},
    wiregate_protocol::WireCodec,
    wiregate_store::{Direction, WireMessageStore},
};

/// Two-tier message store, parameterized over the protocol's opaque
/// wire-message type. Only the codec ever touches the stored form.
pub struct MessageCache<C: WireCodec> {
    l1: Mutex<LruCache<String, (Instant, C)>>,
    ttl: Duration,
    store: WireMessageStore,
}

impl<C: WireCodec> MessageCache<C> {
    #[must_use]
    pub fn new(store: WireMessageStore, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            l1: Mutex::new(LruCache::new(capacity)),
            ttl,
            store,
        }
    }

    /// Record a message: L1 now, durable tier in the background.
    ///
    /// For outbound sends the caller passes the post-send frame the library
    /// returned, never the input descriptor: the network asks for the
    /// ciphertext frame and anything else fails to decrypt on the peer.
    pub fn insert(&self, account_id: &str, direction: Direction, peer_id: &str, message: &C) {
        let message_id = message.message_id().to_string();

        if let Ok(mut l1) = self.l1.lock() {
            l1.put(
                cache_key(account_id, &message_id),
                (Instant::now(), message.clone()),
            );
        }

        let body = match message.to_stored() {
            Ok(body) => body,
            Err(err) => {
                warn!(account_id, message_id, error = %err, "wire message not serializable, durable tier skipped");
                return;
            },
        };

        let store = self.store.clone();
        let account_id = account_id.to_string();
        let peer_id = peer_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = store
                .upsert(&account_id, &message_id, direction, &peer_id, &body)
                .await
            {
                warn!(account_id, message_id, error = %err, "durable wire-message write failed");
            }
        });
    }

    /// Resolve a resend request. L1 first, then the durable tier (which
    /// repopulates L1). A message outside the retention window is an
    /// explicit not-found, never a synthesized empty body.
    pub async fn get(&self, account_id: &str, message_id: &str) -> Result<C> {
        let key = cache_key(account_id, message_id);

        if let Ok(mut l1) = self.l1.lock() {
            let hit = l1.get(&key).map(|(stored_at, message)| {
                if stored_at.elapsed() < self.ttl {
                    Some(message.clone())
                } else {
                    None
                }
            });
            match hit {
                Some(Some(message)) => return Ok(message),
                // Expired entry: drop it and fall through to the durable tier.
                Some(None) => {
                    l1.pop(&key);
                },
                None => {},
            }
        }

        let row = self
            .store
            .get(account_id, message_id)
            .await
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))?;

        let Some(row) = row else {
            return Err(GatewayError::NotFound(format!("wire message {message_id}")));
        };

        let message = C::from_stored(row.body)
            .map_err(|e| GatewayError::internal(format!("stored wire message unreadable: {e}")))?;

        if let Ok(mut l1) = self.l1.lock() {
            l1.put(key, (Instant::now(), message.clone()));
        }
        Ok(message)
    }

    /// Reclaim durable rows older than `retention`.
    pub async fn prune(&self, retention: Duration) -> Result<u64> {
        let cutoff = now_ms() - retention.as_millis() as i64;
        self.store
            .prune_older_than(cutoff)
            .await
            .map_err(|e| GatewayError::StoreUnavailable(e.to_string()))
    }

    /// Entries currently resident in L1.
    #[must_use]
    pub fn l1_len(&self) -> usize {
        self.l1.lock().map(|l1| l1.len()).unwrap_or(0)
    }
}

fn cache_key(account_id: &str, message_id: &str) -> String {
    format!("{account_id}:{message_id}")
}
