//! The HTTP callout and its failure classification.

use {reqwest::StatusCode, tracing::debug};

use wiregate_store::DeliveryJobRow;

use crate::payload::{adapt_payload, signature, timeout_for};

/// Hard cap on serialized payload size; anything larger dead-letters with a
/// synthesized 413 and never touches the wire.
pub const MAX_PAYLOAD_BYTES: usize = 50 * 1024 * 1024;

const SECRET_HEADER: &str = "X-Webhook-Secret";
const ACCOUNT_HEADER: &str = "X-Account-ID";
const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// What one delivery attempt concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx.
    Success { status: u16 },
    /// 5xx, 408, 429, or a transport failure. Worth retrying.
    Retryable { error: String },
    /// Any other 4xx: permanent by contract, dead-letter immediately.
    Permanent { status: u16 },
    /// Payload over [`MAX_PAYLOAD_BYTES`].
    TooLarge,
}

/// Performs webhook POSTs.
#[derive(Clone)]
pub struct Deliverer {
    client: reqwest::Client,
    user_agent: String,
}

impl Deliverer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: format!("wiregate/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// POST the job's payload to its snapshot URL. `test_delivery` adds the
    /// HMAC signature header.
    pub async fn deliver(&self, job: &DeliveryJobRow, test_delivery: bool) -> DeliveryOutcome {
        let payload = adapt_payload(&job.webhook_url, &job.payload);
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(err) => {
                return DeliveryOutcome::Retryable {
                    error: format!("payload serialization failed: {err}"),
                };
            },
        };

        if body.len() > MAX_PAYLOAD_BYTES {
            return DeliveryOutcome::TooLarge;
        }

        let mut request = self
            .client
            .post(&job.webhook_url)
            .timeout(timeout_for(&job.webhook_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(ACCOUNT_HEADER, &job.account_id);

        if let Some(secret) = &job.webhook_secret {
            request = request.header(SECRET_HEADER, secret);
            if test_delivery {
                request = request.header(SIGNATURE_HEADER, signature(secret, &body));
            }
        }

        match request.body(body).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(job_id = %job.id, status = status.as_u16(), "webhook POST answered");
                classify_status(status)
            },
            Err(err) => DeliveryOutcome::Retryable {
                error: format!("transport: {err}"),
            },
        }
    }
}

impl Default for Deliverer {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_status(status: StatusCode) -> DeliveryOutcome {
    let code = status.as_u16();
    if status.is_success() {
        return DeliveryOutcome::Success { status: code };
    }
    if status.is_server_error() || code == 408 || code == 429 {
        return DeliveryOutcome::Retryable {
            error: format!("HTTP {code}"),
        };
    }
    if status.is_client_error() {
        return DeliveryOutcome::Permanent { status: code };
    }
    // 3xx and other oddities: not success, not permanent by contract.
    DeliveryOutcome::Retryable {
        error: format!("HTTP {code}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use wiregate_store::JobStatus;

    use super::*;

    fn job(url: &str, payload: serde_json::Value) -> DeliveryJobRow {
        DeliveryJobRow {
            id: "job-1".into(),
            account_id: "acc-1".into(),
            webhook_id: Some("hook-1".into()),
            webhook_url: url.into(),
            webhook_secret: Some("snapshot-secret".into()),
            payload,
            status: JobStatus::Processing,
            attempt_count: 1,
            max_retries: 5,
            next_attempt_at: 0,
            last_error: None,
            response_status: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::OK),
            DeliveryOutcome::Success { status: 200 }
        );
        assert_eq!(
            classify_status(StatusCode::GONE),
            DeliveryOutcome::Permanent { status: 410 }
        );
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            DeliveryOutcome::Retryable { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            DeliveryOutcome::Retryable { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            DeliveryOutcome::Retryable { .. }
        ));
    }

    #[tokio::test]
    async fn success_carries_headers_and_secret() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_header("x-webhook-secret", "snapshot-secret")
            .match_header("x-account-id", "acc-1")
            .match_header(
                "user-agent",
                mockito::Matcher::Regex("^wiregate/".into()),
            )
            .with_status(200)
            .create_async()
            .await;

        let outcome = Deliverer::new()
            .deliver(
                &job(&format!("{}/hook", server.url()), serde_json::json!({"event": "message"})),
                false,
            )
            .await;

        assert_eq!(outcome, DeliveryOutcome::Success { status: 200 });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delivery_includes_signature() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({"event": "message"});
        let expected = signature("snapshot-secret", &serde_json::to_vec(&body).unwrap());
        let mock = server
            .mock("POST", "/hook")
            .match_header("x-webhook-signature", expected.as_str())
            .with_status(200)
            .create_async()
            .await;

        let outcome = Deliverer::new()
            .deliver(&job(&format!("{}/hook", server.url()), body), true)
            .await;

        assert!(matches!(outcome, DeliveryOutcome::Success { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn gone_endpoint_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(410)
            .create_async()
            .await;

        let outcome = Deliverer::new()
            .deliver(
                &job(&format!("{}/hook", server.url()), serde_json::json!({})),
                false,
            )
            .await;

        assert_eq!(outcome, DeliveryOutcome::Permanent { status: 410 });
    }

    #[tokio::test]
    async fn unreachable_host_is_retryable() {
        let outcome = Deliverer::new()
            .deliver(
                &job("http://127.0.0.1:1/unroutable", serde_json::json!({})),
                false,
            )
            .await;

        assert!(matches!(outcome, DeliveryOutcome::Retryable { .. }));
    }
}
