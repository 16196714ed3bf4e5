//! Frame content and address normalization.

use wiregate_common::{InteractiveKind, InteractiveReply, MessageKind};
use wiregate_protocol::FrameContent;

/// Address suffix carried by LID (opaque linked-id) contacts.
const LID_SERVER: &str = "lid";
/// Address suffix of group chats.
const GROUP_SERVER: &str = "g.us";
/// The status-broadcast pseudo-chat; never routed.
const STATUS_BROADCAST: &str = "status@broadcast";

/// Extracted text, classified kind, and any interactive answer.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedContent {
    pub text: String,
    pub kind: MessageKind,
    pub interactive: Option<InteractiveReply>,
}

/// Pull the user-visible text out of whichever shape the library decoded.
#[must_use]
pub fn normalize_content(content: &FrameContent) -> NormalizedContent {
    match content {
        FrameContent::Conversation { text } | FrameContent::ExtendedText { text } => {
            NormalizedContent {
                text: text.clone(),
                kind: MessageKind::Text,
                interactive: None,
            }
        },
        FrameContent::Image { caption } => NormalizedContent {
            text: caption.clone().unwrap_or_default(),
            kind: MessageKind::Image,
            interactive: None,
        },
        FrameContent::Video { caption } => NormalizedContent {
            text: caption.clone().unwrap_or_default(),
            kind: MessageKind::Video,
            interactive: None,
        },
        FrameContent::Audio => NormalizedContent {
            text: String::new(),
            kind: MessageKind::Audio,
            interactive: None,
        },
        FrameContent::Document { filename } => NormalizedContent {
            text: filename.clone().unwrap_or_default(),
            kind: MessageKind::Document,
            interactive: None,
        },
        FrameContent::Sticker => NormalizedContent {
            text: String::new(),
            kind: MessageKind::Sticker,
            interactive: None,
        },
        FrameContent::Contact { display_name } => NormalizedContent {
            text: display_name.clone().unwrap_or_default(),
            kind: MessageKind::Contact,
            interactive: None,
        },
        FrameContent::Location {
            latitude,
            longitude,
        } => NormalizedContent {
            text: format!("{latitude},{longitude}"),
            kind: MessageKind::Location,
            interactive: None,
        },
        FrameContent::ButtonsResponse { id, title } => interactive_reply(id, title),
        FrameContent::ListResponse { id, title } => interactive_reply(id, title),
    }
}

/// Button and list answers share one shape; the id prefix distinguishes the
/// two when the library's own classification is ambiguous.
fn interactive_reply(id: &str, title: &str) -> NormalizedContent {
    let kind = if id.starts_with("list_") || id.starts_with("row_") {
        InteractiveKind::ListReply
    } else {
        InteractiveKind::ButtonReply
    };
    NormalizedContent {
        text: title.to_string(),
        kind: MessageKind::InteractiveReply,
        interactive: Some(InteractiveReply {
            kind,
            id: id.to_string(),
            title: title.to_string(),
            params: None,
        }),
    }
}

/// The user part of a network address (`919…@s.net` → `919…`).
#[must_use]
pub fn user_part(address: &str) -> &str {
    address.split('@').next().unwrap_or(address)
}

/// Server part of a network address.
fn server_part(address: &str) -> &str {
    address.split('@').nth(1).unwrap_or("")
}

#[must_use]
pub fn is_lid(address: &str) -> bool {
    server_part(address) == LID_SERVER
}

#[must_use]
pub fn is_group(address: &str) -> bool {
    server_part(address) == GROUP_SERVER
}

#[must_use]
pub fn is_status_broadcast(address: &str) -> bool {
    address == STATUS_BROADCAST
}

/// E.164 digits from an address user part: device suffixes (`:12`) and any
/// non-digit decoration dropped.
#[must_use]
pub fn phone_digits(address: &str) -> String {
    let user = user_part(address);
    let without_device = user.split(':').next().unwrap_or(user);
    without_device.chars().filter(char::is_ascii_digit).collect()
}
