//! Glue between the inbound router and the paced send path.

use std::sync::Arc;

use {async_trait::async_trait, tracing::{debug, warn}};

use {
    wiregate_common::{MessageEvent, Result},
    wiregate_router::InboundHook,
};

use crate::{adapter::ChatMessage, engine::AutoReplyEngine};

/// The outbound path replies travel. Implemented by the account runtime;
/// admission, typing simulation, and duplicate checks all happen inside.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Send `body` to `to` on `account_id`; returns the message id.
    async fn send_reply(&self, account_id: &str, to: &str, body: &str) -> Result<String>;
}

/// Router hook that generates and sends an auto-reply.
pub struct AutoReplyHook {
    engine: AutoReplyEngine,
    sender: Arc<dyn ReplySender>,
}

impl AutoReplyHook {
    #[must_use]
    pub fn new(engine: AutoReplyEngine, sender: Arc<dyn ReplySender>) -> Self {
        Self { engine, sender }
    }
}

#[async_trait]
impl InboundHook for AutoReplyHook {
    async fn on_message(&self, event: MessageEvent) {
        if !self.engine.has_adapters() || event.message.trim().is_empty() {
            return;
        }

        let history = [ChatMessage::user(event.message.clone())];
        let reply = match self.engine.generate(&history).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(account_id = %event.account_id, error = %err, "auto-reply generation failed");
                return;
            },
        };

        match self
            .sender
            .send_reply(&event.account_id, &event.sender, &reply)
            .await
        {
            Ok(message_id) => {
                debug!(account_id = %event.account_id, message_id, "auto-reply sent");
            },
            Err(err) => {
                // Pacer rejections land here too; they are policy, not bugs.
                warn!(account_id = %event.account_id, kind = err.kind(), "auto-reply not sent");
            },
        }
    }
}
