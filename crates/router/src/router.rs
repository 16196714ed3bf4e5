//! The inbound router: frames in, canonical events out.

use std::sync::Arc;

use {async_trait::async_trait, tracing::{debug, warn}};

use {
    wiregate_common::{AckLevel, EventKind, MessageAckEvent, MessageEvent, time::unix_secs},
    wiregate_protocol::InboundFrame,
    wiregate_webhooks::SubscriptionService,
};

use crate::{
    lid::LidMap,
    normalize::{is_group, is_lid, is_status_broadcast, normalize_content, phone_digits, user_part},
};

/// Receives canonical events for direct (non-group) chats; the auto-reply
/// pipeline hangs off this seam.
#[async_trait]
pub trait InboundHook: Send + Sync {
    async fn on_message(&self, event: MessageEvent);
}

/// Normalizes and dispatches inbound traffic for all accounts.
pub struct InboundRouter {
    lid_map: Arc<LidMap>,
    subscriptions: Arc<SubscriptionService>,
    hook: std::sync::OnceLock<Arc<dyn InboundHook>>,
}

impl InboundRouter {
    #[must_use]
    pub fn new(lid_map: Arc<LidMap>, subscriptions: Arc<SubscriptionService>) -> Self {
        Self {
            lid_map,
            subscriptions,
            hook: std::sync::OnceLock::new(),
        }
    }

    /// Install the auto-reply hook. Bound once, after the send path exists.
    pub fn set_hook(&self, hook: Arc<dyn InboundHook>) {
        let _ = self.hook.set(hook);
    }

    #[must_use]
    pub fn with_hook(self, hook: Arc<dyn InboundHook>) -> Self {
        self.set_hook(hook);
        self
    }

    /// Record a LID mapping learned from a contact update.
    pub fn observe_contact(&self, lid_address: &str, phone_address: &str) {
        self.lid_map
            .insert(user_part(lid_address), &phone_digits(phone_address));
    }

    /// Normalize one inbound frame. Returns the canonical event, or `None`
    /// for traffic the gateway drops (status broadcasts, self-echoes).
    pub async fn route_frame(
        &self,
        account_id: &str,
        self_phone: &str,
        frame: &InboundFrame,
    ) -> Option<MessageEvent> {
        if is_status_broadcast(&frame.key.chat_id) {
            debug!(account_id, "dropping status broadcast");
            return None;
        }
        if frame.key.from_me {
            debug!(account_id, "dropping self-echo");
            return None;
        }

        let group = is_group(&frame.key.chat_id);
        let sender_address = frame
            .key
            .participant
            .as_deref()
            .filter(|_| group)
            .unwrap_or(&frame.key.chat_id);

        let sender = self.resolve_sender(sender_address, frame.key.sender_pn.as_deref());

        let content = normalize_content(&frame.content);
        let now = unix_secs();
        let event = MessageEvent {
            event: EventKind::Message.as_str().to_string(),
            account_id: account_id.to_string(),
            direction: "incoming".to_string(),
            message_id: frame.key.id.clone(),
            sender,
            recipient: self_phone.to_string(),
            message: content.text,
            timestamp: if frame.timestamp > 0 { frame.timestamp } else { now },
            kind: content.kind,
            chat_id: frame.key.chat_id.clone(),
            is_group: group,
            interactive_reply: content.interactive,
            created_at: now,
        };

        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(err) = self
                    .subscriptions
                    .enqueue_event(account_id, EventKind::Message, &payload)
                    .await
                {
                    warn!(account_id, error = %err, "webhook enqueue failed");
                }
            },
            Err(err) => warn!(account_id, error = %err, "event serialization failed"),
        }

        // Auto-reply never runs for groups; that is a fast path to a ban.
        if !group && let Some(hook) = self.hook.get() {
            let hook = Arc::clone(hook);
            let hook_event = event.clone();
            tokio::spawn(async move {
                hook.on_message(hook_event).await;
            });
        }

        Some(event)
    }

    /// Forward a delivery/read receipt as a `message_ack` event.
    pub async fn route_ack(&self, account_id: &str, message_id: &str, peer: &str, level: u8) {
        let Some(level) = AckLevel::from_code(level) else {
            return;
        };
        let event = MessageAckEvent::new(account_id, message_id, &phone_digits(peer), level);

        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(err) = self
                    .subscriptions
                    .enqueue_event(account_id, EventKind::MessageAck, &payload)
                    .await
                {
                    warn!(account_id, error = %err, "ack enqueue failed");
                }
            },
            Err(err) => warn!(account_id, error = %err, "ack serialization failed"),
        }
    }

    fn resolve_sender(&self, sender_address: &str, sender_pn: Option<&str>) -> String {
        // A key-carried phone hint beats everything, and teaches the map
        // when the remote id is a LID.
        if let Some(hint) = sender_pn {
            let digits = phone_digits(hint);
            if !digits.is_empty() {
                if is_lid(sender_address) {
                    self.lid_map.insert(user_part(sender_address), &digits);
                }
                return digits;
            }
        }

        if is_lid(sender_address) {
            if let Some(phone) = self.lid_map.resolve(user_part(sender_address)) {
                return phone;
            }
            // Unresolvable LID: surface the opaque user part rather than
            // inventing digits.
            return user_part(sender_address).to_string();
        }

        phone_digits(sender_address)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        tokio::sync::Notify,
        wiregate_protocol::{FrameContent, MessageKey},
        wiregate_store::{QueueStore, WebhookStore},
    };

    use super::*;

    struct RecordingHook {
        seen: Mutex<Vec<MessageEvent>>,
        notify: Notify,
    }

    #[async_trait]
    impl InboundHook for RecordingHook {
        async fn on_message(&self, event: MessageEvent) {
            self.seen.lock().unwrap().push(event);
            self.notify.notify_one();
        }
    }

    async fn rig() -> (InboundRouter, Arc<RecordingHook>, QueueStore) {
        let pool = wiregate_store::open_pool("sqlite::memory:").await.unwrap();
        let webhooks = WebhookStore::with_pool(pool.clone());
        let queue = QueueStore::with_pool(pool);
        webhooks
            .create("acc", "https://subscriber.example/h", Some("s"), None, true, None)
            .await
            .unwrap();

        let subscriptions = Arc::new(SubscriptionService::new(
            webhooks,
            queue.clone(),
            5,
            Arc::new(Notify::new()),
        ));
        let hook = Arc::new(RecordingHook {
            seen: Mutex::new(Vec::new()),
            notify: Notify::new(),
        });
        let router = InboundRouter::new(Arc::new(LidMap::new(100)), subscriptions)
            .with_hook(Arc::clone(&hook) as Arc<dyn InboundHook>);
        (router, hook, queue)
    }

    fn frame(chat: &str, from_me: bool, content: FrameContent) -> InboundFrame {
        InboundFrame {
            key: MessageKey {
                chat_id: chat.to_string(),
                from_me,
                id: "MSG1".to_string(),
                participant: None,
                sender_pn: None,
            },
            content,
            timestamp: 1_700_000_123,
            push_name: Some("Asha".to_string()),
        }
    }

    #[tokio::test]
    async fn direct_text_produces_event_and_webhook_job() {
        let (router, hook, queue) = rig().await;

        let event = router
            .route_frame(
                "acc",
                "911111111111",
                &frame(
                    "919812345678@s.net",
                    false,
                    FrameContent::Conversation {
                        text: "hello".into(),
                    },
                ),
            )
            .await
            .unwrap();

        assert_eq!(event.sender, "919812345678");
        assert_eq!(event.recipient, "911111111111");
        assert_eq!(event.message, "hello");
        assert!(!event.is_group);
        assert_eq!(event.timestamp, 1_700_000_123);

        let jobs = queue.due_batch(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].payload["event"], "message");
        assert_eq!(jobs[0].payload["sender"], "919812345678");

        hook.notify.notified().await;
        assert_eq!(hook.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_broadcast_and_self_echo_are_dropped() {
        let (router, _hook, queue) = rig().await;

        let dropped = router
            .route_frame(
                "acc",
                "911111111111",
                &frame("status@broadcast", false, FrameContent::Sticker),
            )
            .await;
        assert!(dropped.is_none());

        let echoed = router
            .route_frame(
                "acc",
                "911111111111",
                &frame(
                    "919812345678@s.net",
                    true,
                    FrameContent::Conversation { text: "mine".into() },
                ),
            )
            .await;
        assert!(echoed.is_none());

        assert!(queue.due_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_messages_skip_the_auto_reply_hook() {
        let (router, hook, queue) = rig().await;

        let mut group_frame = frame(
            "120363400000@g.us",
            false,
            FrameContent::Conversation { text: "hey all".into() },
        );
        group_frame.key.participant = Some("919812345678@s.net".to_string());

        let event = router
            .route_frame("acc", "911111111111", &group_frame)
            .await
            .unwrap();
        assert!(event.is_group);
        assert_eq!(event.sender, "919812345678");

        // The webhook still fires; the hook does not.
        assert_eq!(queue.due_batch(10).await.unwrap().len(), 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(hook.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lid_sender_resolves_through_hint_and_map() {
        let (router, _hook, _queue) = rig().await;

        // First frame carries the phone hint: event uses it and the map learns.
        let mut hinted = frame(
            "88123456@lid",
            false,
            FrameContent::Conversation { text: "hi".into() },
        );
        hinted.key.sender_pn = Some("919812345678@s.net".to_string());
        let event = router
            .route_frame("acc", "911111111111", &hinted)
            .await
            .unwrap();
        assert_eq!(event.sender, "919812345678");

        // Second frame has no hint: the learned mapping answers.
        let bare = frame(
            "88123456@lid",
            false,
            FrameContent::Conversation { text: "again".into() },
        );
        let event = router
            .route_frame("acc", "911111111111", &bare)
            .await
            .unwrap();
        assert_eq!(event.sender, "919812345678");

        // Unknown LID stays opaque.
        let unknown = frame(
            "99000001@lid",
            false,
            FrameContent::Conversation { text: "?".into() },
        );
        let event = router
            .route_frame("acc", "911111111111", &unknown)
            .await
            .unwrap();
        assert_eq!(event.sender, "99000001");
    }

    #[tokio::test]
    async fn acks_become_message_ack_events() {
        let pool = wiregate_store::open_pool("sqlite::memory:").await.unwrap();
        let webhooks = WebhookStore::with_pool(pool.clone());
        let queue = QueueStore::with_pool(pool);
        webhooks
            .create("acc", "https://all.example/h", None, Some(vec!["*".into()]), true, None)
            .await
            .unwrap();
        let subscriptions = Arc::new(SubscriptionService::new(
            webhooks,
            queue.clone(),
            5,
            Arc::new(Notify::new()),
        ));
        let router = InboundRouter::new(Arc::new(LidMap::new(10)), subscriptions);

        router
            .route_ack("acc", "MSG1", "919812345678@s.net", 3)
            .await;

        let jobs = queue.due_batch(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].payload["event"], "message_ack");
        assert_eq!(jobs[0].payload["ack"], 3);
        assert_eq!(jobs[0].payload["ack_name"], "delivered");
        assert_eq!(jobs[0].payload["recipient"], "919812345678");

        // Unknown ack codes are ignored outright.
        router.route_ack("acc", "MSG1", "919812345678@s.net", 9).await;
        assert_eq!(queue.due_batch(10).await.unwrap().len(), 1);
    }
}
