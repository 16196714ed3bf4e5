//! Canonical event shapes delivered to webhook subscribers.
//!
//! These are the only message shapes that leave the gateway; no
//! protocol-library type ever appears here.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Lifecycle status of a connected account, as persisted and surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Initializing,
    QrReady,
    Ready,
    Reconnecting,
    Disconnected,
    Error,
    NeedsQr,
}

impl AccountStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::QrReady => "qr_ready",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::NeedsQr => "needs_qr",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "qr_ready" => Ok(Self::QrReady),
            "ready" => Ok(Self::Ready),
            "reconnecting" => Ok(Self::Reconnecting),
            "disconnected" => Ok(Self::Disconnected),
            "error" => Ok(Self::Error),
            "needs_qr" => Ok(Self::NeedsQr),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// Kinds of events a webhook subscription can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    MessageAck,
    Qr,
    Ready,
    Disconnected,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::MessageAck => "message_ack",
            Self::Qr => "qr",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether a subscription's `events` entry selects this kind.
    /// `*` and `all` are wildcards.
    #[must_use]
    pub fn selected_by(&self, entry: &str) -> bool {
        entry == "*" || entry == "all" || entry == self.as_str()
    }
}

/// Classified content type of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Contact,
    Location,
    InteractiveReply,
}

/// Which interactive element the peer answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractiveKind {
    ButtonReply,
    ListReply,
}

/// Detail of a button or list answer carried inside a `message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveReply {
    #[serde(rename = "type")]
    pub kind: InteractiveKind,
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// The canonical inbound `message` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub event: String,
    pub account_id: String,
    pub direction: String,
    pub message_id: String,
    /// E.164 digits of the sender, LIDs already resolved where possible.
    pub sender: String,
    pub recipient: String,
    pub message: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub chat_id: String,
    pub is_group: bool,
    pub interactive_reply: Option<InteractiveReply>,
    pub created_at: i64,
}

/// Delivery/read receipt levels as the network reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckLevel {
    Sent,
    Delivered,
    Read,
}

impl AckLevel {
    /// Numeric ack code on the wire (2/3/4).
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::Sent => 2,
            Self::Delivered => 3,
            Self::Read => 4,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(Self::Sent),
            3 => Some(Self::Delivered),
            4 => Some(Self::Read),
            _ => None,
        }
    }
}

/// The canonical `message_ack` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAckEvent {
    pub event: String,
    pub account_id: String,
    pub message_id: String,
    pub recipient: String,
    pub ack: u8,
    pub ack_name: String,
    pub timestamp: i64,
}

impl MessageAckEvent {
    #[must_use]
    pub fn new(account_id: &str, message_id: &str, recipient: &str, level: AckLevel) -> Self {
        Self {
            event: EventKind::MessageAck.as_str().to_string(),
            account_id: account_id.to_string(),
            message_id: message_id.to_string(),
            recipient: recipient.to_string(),
            ack: level.code(),
            ack_name: level.name().to_string(),
            timestamp: crate::time::unix_secs(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            AccountStatus::Initializing,
            AccountStatus::QrReady,
            AccountStatus::Ready,
            AccountStatus::Reconnecting,
            AccountStatus::Disconnected,
            AccountStatus::Error,
            AccountStatus::NeedsQr,
        ] {
            assert_eq!(status.as_str().parse::<AccountStatus>().unwrap(), status);
        }
    }

    #[test]
    fn event_kind_wildcards() {
        assert!(EventKind::Message.selected_by("*"));
        assert!(EventKind::MessageAck.selected_by("all"));
        assert!(EventKind::Message.selected_by("message"));
        assert!(!EventKind::Message.selected_by("message_ack"));
    }

    #[test]
    fn message_event_serializes_with_type_field() {
        let event = MessageEvent {
            event: "message".into(),
            account_id: "acc".into(),
            direction: "incoming".into(),
            message_id: "m1".into(),
            sender: "919999999999".into(),
            recipient: "918888888888".into(),
            message: "hello".into(),
            timestamp: 1_700_000_000,
            kind: MessageKind::Text,
            chat_id: "chat".into(),
            is_group: false,
            interactive_reply: None,
            created_at: 1_700_000_000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["interactive_reply"], serde_json::Value::Null);
    }

    #[test]
    fn ack_codes_match_wire_values() {
        assert_eq!(AckLevel::Sent.code(), 2);
        assert_eq!(AckLevel::Read.name(), "read");
        assert_eq!(AckLevel::from_code(3), Some(AckLevel::Delivered));
        assert_eq!(AckLevel::from_code(9), None);
    }
}
