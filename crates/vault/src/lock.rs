//! Instance-ownership arbitration.
//!
//! Each process stamps `{instance_id, acquired_at}` into every blob it
//! saves. A foreign lock younger than the stale window means another process
//! is driving the account; a stale one may be taken over.

use std::sync::OnceLock;

use wiregate_common::time::{now_ms, unix_secs};

use crate::blob::AuthBlob;

/// This process's identity: `hostname-pid-starttime`. Stable for the process
/// lifetime.
pub fn instance_id() -> &'static str {
    static ID: OnceLock<String> = OnceLock::new();
    ID.get_or_init(|| {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        format!("{host}-{}-{}", std::process::id(), unix_secs())
    })
}

/// Outcome of inspecting a blob's ownership lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCheck {
    /// No lock recorded; free to claim.
    Free,
    /// We already hold it.
    Mine,
    /// Another instance holds it and refreshed it recently.
    Held { holder: String },
    /// Another instance held it but the lock has gone stale; may be stolen.
    Stale { holder: String },
}

/// Classify the blob's lock relative to `my_id`.
#[must_use]
pub fn check(blob: &AuthBlob, my_id: &str, stale_window_ms: i64) -> LockCheck {
    let Some(holder) = blob.active_instance_id.as_deref() else {
        return LockCheck::Free;
    };
    if holder == my_id {
        return LockCheck::Mine;
    }

    let age = now_ms() - blob.acquired_at_ms.unwrap_or(0);
    if age > stale_window_ms {
        LockCheck::Stale {
            holder: holder.to_string(),
        }
    } else {
        LockCheck::Held {
            holder: holder.to_string(),
        }
    }
}
