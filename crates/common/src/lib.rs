//! Shared types, error taxonomy, and utilities used across all wiregate crates.

pub mod error;
pub mod events;
pub mod time;

pub use {
    error::{GatewayError, Result},
    events::{
        AccountStatus, AckLevel, EventKind, InteractiveKind, InteractiveReply, MessageAckEvent,
        MessageEvent, MessageKind,
    },
};
