//! Wire-level types crossing the protocol seam.

use {
    anyhow::{Result, bail},
    serde::{Deserialize, Serialize},
};

/// Why a transport closed. The runtime's reconnect policy branches on this
/// and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectCause {
    /// The account was logged out remotely. Terminal; auth must be cleared.
    LoggedOut,
    /// Another device or process took over the session.
    ConnectionReplaced,
    /// The library wants the socket rebuilt (common mid-pairing).
    RestartRequired,
    /// Plain transport close.
    ConnectionClosed,
    /// Anything else, with the library's status code.
    Other(u16),
}

impl DisconnectCause {
    /// Causes after which the persisted auth state is garbage.
    #[must_use]
    pub fn should_clear_auth(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    /// Causes that, during pairing, mean "rebuild the socket but keep the
    /// half-built local handshake state".
    #[must_use]
    pub fn is_pairing_recoverable(&self) -> bool {
        matches!(self, Self::RestartRequired | Self::ConnectionClosed)
    }
}

/// Direct-chat address for a phone number given as E.164 digits.
#[must_use]
pub fn direct_chat_address(phone_digits: &str) -> String {
    format!("{phone_digits}@s.net")
}

/// The stable client identity presented to the network for one account.
/// Derived once from the account id; never rotates between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFingerprint {
    pub device_label: String,
    pub browser: String,
    pub version: String,
}

/// Addressing metadata of one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageKey {
    /// Chat the message arrived in (peer or group id).
    pub chat_id: String,
    pub from_me: bool,
    pub id: String,
    /// Sender within a group chat.
    pub participant: Option<String>,
    /// E.164 digits hint carried alongside LID remote ids.
    pub sender_pn: Option<String>,
}

/// Decoded content of one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameContent {
    Conversation { text: String },
    ExtendedText { text: String },
    Image { caption: Option<String> },
    Video { caption: Option<String> },
    Audio,
    Document { filename: Option<String> },
    Sticker,
    Contact { display_name: Option<String> },
    Location { latitude: f64, longitude: f64 },
    ButtonsResponse { id: String, title: String },
    ListResponse { id: String, title: String },
}

/// One inbound protocol message, already decrypted by the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    pub key: MessageKey,
    pub content: FrameContent,
    pub timestamp: i64,
    pub push_name: Option<String>,
}

/// Everything the transport can tell the runtime.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A pairing QR payload was (re-)issued.
    Qr(String),
    /// The connection is open and authenticated.
    Open { me_id: String, me_phone: String },
    /// The transport closed.
    Closed(DisconnectCause),
    /// An inbound message arrived.
    Message(InboundFrame),
    /// A delivery/read receipt for a message we sent.
    Ack {
        message_id: String,
        peer: String,
        level: u8,
    },
    /// The library rotated its rate keys; auth state must be re-persisted.
    CredsRotated,
    /// A contact update revealed a LID-to-phone mapping.
    ContactUpdate { lid: String, phone: String },
}

/// A fully-formed post-send protocol frame.
///
/// This is what the network will ask us to resend, ciphertext included. It is
/// never the caller's input descriptor, and it is only ever (de)serialized
/// through [`WireCodec`] because the library's objects may be cyclic.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    id: String,
    frame: serde_json::Value,
}

impl WireMessage {
    #[must_use]
    pub fn new(id: impl Into<String>, frame: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            frame,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn frame(&self) -> &serde_json::Value {
        &self.frame
    }
}

/// The only legal serialization path for stored wire-messages.
pub trait WireCodec: Sized + Clone + Send + Sync + 'static {
    fn message_id(&self) -> &str;
    fn to_stored(&self) -> Result<serde_json::Value>;
    fn from_stored(value: serde_json::Value) -> Result<Self>;
}

impl WireCodec for WireMessage {
    fn message_id(&self) -> &str {
        &self.id
    }

    fn to_stored(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "id": self.id, "frame": self.frame }))
    }

    fn from_stored(value: serde_json::Value) -> Result<Self> {
        let Some(id) = value.get("id").and_then(|v| v.as_str()) else {
            bail!("stored wire-message is missing its id");
        };
        let frame = value
            .get("frame")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(Self {
            id: id.to_string(),
            frame,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_classification() {
        assert!(DisconnectCause::LoggedOut.should_clear_auth());
        assert!(!DisconnectCause::ConnectionReplaced.should_clear_auth());
        assert!(DisconnectCause::RestartRequired.is_pairing_recoverable());
        assert!(DisconnectCause::ConnectionClosed.is_pairing_recoverable());
        assert!(!DisconnectCause::Other(503).is_pairing_recoverable());
    }

    #[test]
    fn wire_message_codec_round_trip() {
        let msg = WireMessage::new("ABC123", serde_json::json!({"ciphertext": "deadbeef"}));
        let stored = msg.to_stored().unwrap();
        let back = WireMessage::from_stored(stored).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.message_id(), "ABC123");
    }

    #[test]
    fn stored_without_id_is_rejected() {
        assert!(WireMessage::from_stored(serde_json::json!({"frame": {}})).is_err());
    }
}
