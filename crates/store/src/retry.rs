//! Retry wrapper for transient store failures.
//!
//! A busy or briefly unavailable database is retried with jittered
//! exponential backoff; persistent failure surfaces as
//! [`GatewayError::StoreUnavailable`] so the caller can answer 503.

use std::{future::Future, time::Duration};

use {rand::Rng, tracing::warn};

use wiregate_common::GatewayError;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 100;

/// Run `op` up to three times before giving up.
pub async fn with_store_retries<T, F, Fut>(label: &str, mut op: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS => {
                let backoff = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                let jitter = rand::rng().random_range(0..backoff / 2 + 1);
                warn!(label, attempt, error = %err, "store operation failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            },
            Err(err) => {
                warn!(label, attempt, error = %err, "store operation exhausted retries");
                return Err(GatewayError::StoreUnavailable(format!("{label}: {err}")));
            },
        }
    }
}
