//! Abstraction over the network's web-client protocol library.
//!
//! The real cryptographic transport is an external collaborator; everything
//! above it programs against the traits in this crate. The [`scripted`]
//! module provides an in-memory engine that replays programmed event
//! sequences, used throughout the workspace's tests.

pub mod scripted;
pub mod sidecar;
pub mod socket;
pub mod types;

pub use {
    sidecar::SidecarEngine,
    socket::{Presence, ProtocolEngine, ProtocolSocket, SocketSession},
    types::{
        ClientFingerprint, DisconnectCause, FrameContent, InboundFrame, MessageKey, SocketEvent,
        WireCodec, WireMessage, direct_chat_address,
    },
};
