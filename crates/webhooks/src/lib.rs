//! Durable at-least-once webhook fan-out.
//!
//! Inbound events become rows in the delivery queue; a single worker loop
//! claims due rows, POSTs them, and applies the retry/dead-letter policy.
//! Consumers must be idempotent on `message_id`: the gateway retries,
//! it never deduplicates.

pub mod delivery;
pub mod payload;
pub mod subscriptions;
pub mod worker;

pub use {
    delivery::{Deliverer, DeliveryOutcome},
    payload::{adapt_payload, is_automation_platform, signature},
    subscriptions::SubscriptionService,
    worker::WebhookWorker,
};
