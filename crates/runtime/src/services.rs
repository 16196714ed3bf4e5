//! The shared service bundle runtimes work against.
//!
//! Everything that used to be a process-wide singleton in earlier gateway
//! generations (rate state, duplicate guard, message cache, LID map) lives
//! here explicitly, created at supervisor init and dropped on shutdown.

use std::sync::Arc;

use {
    wiregate_config::GatewayConfig,
    wiregate_msgcache::MessageCache,
    wiregate_pacer::{DuplicateGuard, Pacer},
    wiregate_protocol::{ProtocolEngine, WireMessage},
    wiregate_router::InboundRouter,
    wiregate_store::AccountStore,
    wiregate_vault::SessionVault,
};

/// Shared, explicitly-passed services.
pub struct Services {
    pub engine: Arc<dyn ProtocolEngine>,
    pub accounts: AccountStore,
    pub vault: SessionVault,
    pub pacer: Arc<Pacer>,
    pub duplicates: Arc<DuplicateGuard>,
    pub msgcache: Arc<MessageCache<WireMessage>>,
    pub router: Arc<InboundRouter>,
    pub config: GatewayConfig,
}
