//! Adapter iteration with per-category fallthrough.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapter::{ChatMessage, LlmAdapter, LlmError};

/// Tries each configured adapter in order until one produces a reply.
pub struct AutoReplyEngine {
    adapters: Vec<Arc<dyn LlmAdapter>>,
    system_prompt: String,
}

impl AutoReplyEngine {
    #[must_use]
    pub fn new(adapters: Vec<Arc<dyn LlmAdapter>>, system_prompt: impl Into<String>) -> Self {
        Self {
            adapters,
            system_prompt: system_prompt.into(),
        }
    }

    /// Generate a reply, falling through on any adapter failure. Returns the
    /// last error when every adapter fails.
    pub async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let mut last_error = LlmError::Invalid("no adapters configured".to_string());

        for adapter in &self.adapters {
            match adapter.generate(messages, &self.system_prompt).await {
                Ok(reply) if !reply.trim().is_empty() => {
                    debug!(adapter = adapter.name(), "reply generated");
                    return Ok(reply);
                },
                Ok(_) => {
                    warn!(adapter = adapter.name(), "adapter returned an empty reply");
                    last_error = LlmError::Invalid("empty reply".to_string());
                },
                Err(err) => {
                    warn!(adapter = adapter.name(), error = %err, "adapter failed, trying next");
                    last_error = err;
                },
            }
        }
        Err(last_error)
    }

    #[must_use]
    pub fn has_adapters(&self) -> bool {
        !self.adapters.is_empty()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use {super::*, crate::adapter::EchoAdapter};

    struct FailingAdapter(LlmError);

    #[async_trait]
    impl LlmAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _system: &str,
        ) -> Result<String, LlmError> {
            Err(self.0.clone())
        }
    }

    #[tokio::test]
    async fn falls_through_to_a_working_adapter() {
        let engine = AutoReplyEngine::new(
            vec![
                Arc::new(FailingAdapter(LlmError::RateLimited { retry_after: Some(30) })),
                Arc::new(FailingAdapter(LlmError::Auth)),
                Arc::new(EchoAdapter),
            ],
            "be brief",
        );

        let reply = engine
            .generate(&[ChatMessage::user("hello")])
            .await
            .unwrap();
        assert_eq!(reply, "Echo: hello");
    }

    #[tokio::test]
    async fn surfaces_the_last_error_when_all_fail() {
        let engine = AutoReplyEngine::new(
            vec![
                Arc::new(FailingAdapter(LlmError::Auth)),
                Arc::new(FailingAdapter(LlmError::Server("boom".into()))),
            ],
            "",
        );

        let err = engine
            .generate(&[ChatMessage::user("hello")])
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Server("boom".into()));
    }

    #[tokio::test]
    async fn no_adapters_is_an_invalid_error() {
        let engine = AutoReplyEngine::new(vec![], "");
        assert!(!engine.has_adapters());
        assert!(matches!(
            engine.generate(&[]).await,
            Err(LlmError::Invalid(_))
        ));
    }
}
