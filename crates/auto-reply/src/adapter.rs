//! The provider adapter seam.

use async_trait::async_trait;

/// Who said what, provider-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Why a provider call failed. The engine's fallthrough policy branches on
/// the category, never on provider-specific text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Key rejected; retrying the same adapter is pointless.
    Auth,
    RateLimited { retry_after: Option<u64> },
    Server(String),
    /// The provider answered with something unusable.
    Invalid(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "authentication rejected"),
            Self::RateLimited { retry_after } => match retry_after {
                Some(secs) => write!(f, "rate limited, retry in {secs}s"),
                None => write!(f, "rate limited"),
            },
            Self::Server(msg) => write!(f, "provider error: {msg}"),
            Self::Invalid(msg) => write!(f, "unusable response: {msg}"),
        }
    }
}

/// One reply provider. Implementations hold no shared mutable state.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        messages: &[ChatMessage],
        system: &str,
    ) -> Result<String, LlmError>;
}

/// Development fallback: echoes the last user message.
pub struct EchoAdapter;

#[async_trait]
impl LlmAdapter for EchoAdapter {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        _system: &str,
    ) -> Result<String, LlmError> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        if last.is_empty() {
            Ok("Echo: (no text)".to_string())
        } else {
            Ok(format!("Echo: {last}"))
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_repeats_the_last_user_message() {
        let reply = EchoAdapter
            .generate(
                &[
                    ChatMessage::user("first"),
                    ChatMessage::assistant("Echo: first"),
                    ChatMessage::user("second"),
                ],
                "",
            )
            .await
            .unwrap();
        assert_eq!(reply, "Echo: second");
    }

    #[tokio::test]
    async fn echo_handles_empty_history() {
        let reply = EchoAdapter.generate(&[], "").await.unwrap();
        assert_eq!(reply, "Echo: (no text)");
    }
}
