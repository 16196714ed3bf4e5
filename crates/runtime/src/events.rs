//! Events a runtime publishes to in-process observers.
//!
//! Nothing here carries a protocol-library type; subscribers see canonical
//! shapes only.

use wiregate_common::{MessageAckEvent, MessageEvent};

/// Published on each runtime's broadcast channel.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A pairing QR was issued, rendered as a data URL.
    Qr { data_url: String },
    /// The account reached `Ready` with this phone id.
    Ready { phone: String },
    /// The account disconnected for good (this run).
    Disconnected { reason: String },
    /// A normalized inbound message.
    MessageIn(MessageEvent),
    /// A delivery/read receipt.
    MessageAck(MessageAckEvent),
}
