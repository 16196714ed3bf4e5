//! Gateway configuration: every knob has a default and a `WIREGATE_*`
//! environment override.

pub mod schema;

pub use schema::{
    CacheConfig, GatewayConfig, PacerConfig, StoreConfig, SupervisorConfig, WebhookConfig,
};
