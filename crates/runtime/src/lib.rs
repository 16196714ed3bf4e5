//! Per-account connection lifecycle and the process-wide supervisor.
//!
//! One [`AccountRuntime`] per account owns its protocol socket, drives
//! pairing and reconnects, and is the only path outbound sends take. The
//! [`Supervisor`] owns the set of runtimes, staggers startup, runs the
//! periodic chores, and coordinates graceful shutdown.

pub mod events;
pub mod qr;
pub mod reconnect;
pub mod runtime;
pub mod services;
pub mod supervisor;

pub use {
    events::RuntimeEvent,
    runtime::AccountRuntime,
    services::Services,
    supervisor::Supervisor,
};
