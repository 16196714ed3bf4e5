//! Inbound message normalization and dispatch.
//!
//! Protocol frames become canonical events here: text extraction, type
//! classification, LID-to-phone resolution, broadcast/self-echo filtering,
//! webhook fan-out, and the optional auto-reply hook.

pub mod lid;
pub mod normalize;
pub mod router;

pub use {
    lid::LidMap,
    router::{InboundHook, InboundRouter},
};
