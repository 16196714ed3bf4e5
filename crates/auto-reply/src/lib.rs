//! Optional auto-reply: inbound direct messages are answered by whichever
//! LLM adapter responds first. Replies go out through the paced send path
//! like any other message, never straight to the socket.

pub mod adapter;
pub mod engine;
pub mod hook;

pub use {
    adapter::{ChatMessage, ChatRole, EchoAdapter, LlmAdapter, LlmError},
    engine::AutoReplyEngine,
    hook::{AutoReplyHook, ReplySender},
};
