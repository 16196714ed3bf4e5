//! Socket and engine traits the rest of the workspace programs against.

use std::{path::Path, sync::Arc};

use {anyhow::Result, async_trait::async_trait, tokio::sync::mpsc};

use crate::types::{ClientFingerprint, SocketEvent, WireMessage};

/// Presence states the gateway ever emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Composing,
    Paused,
}

impl Presence {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Composing => "composing",
            Self::Paused => "paused",
        }
    }
}

/// One live, authenticated (or pairing) connection for one account.
///
/// Implementations serialize their own wire access; callers may invoke these
/// from any task.
#[async_trait]
pub trait ProtocolSocket: Send + Sync {
    /// Send a text message. Returns the post-send frame, ciphertext included.
    async fn send_text(&self, to: &str, body: &str) -> Result<WireMessage>;

    /// Update presence, chat-scoped when `to` is given.
    async fn send_presence(&self, to: Option<&str>, presence: Presence) -> Result<()>;

    /// Subscribe to a peer's presence channel (required before composing).
    async fn subscribe_presence(&self, peer: &str) -> Result<()>;

    /// Log the account out remotely. The transport will close with the
    /// logged-out cause.
    async fn logout(&self) -> Result<()>;

    /// Close the transport without logging out.
    async fn close(&self) -> Result<()>;
}

/// A socket handle plus the serialized event stream belonging to it.
pub struct SocketSession {
    pub socket: Arc<dyn ProtocolSocket>,
    pub events: mpsc::Receiver<SocketEvent>,
}

/// Factory for protocol connections.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Open a socket for `account_id` using the auth material in `auth_dir`.
    /// An empty or unpaired directory starts a fresh pairing (QR events).
    async fn connect(
        &self,
        account_id: &str,
        auth_dir: &Path,
        fingerprint: &ClientFingerprint,
    ) -> Result<SocketSession>;
}
