//! Duplicate-send suppression.
//!
//! Caller retry loops would otherwise produce the exact duplicate
//! fingerprint the network flags as automation. In-process only; a restart
//! forgetting recent sends is acceptable.

use std::time::Duration;

use {
    dashmap::DashMap,
    sha2::{Digest, Sha256},
    tokio::time::Instant,
};

use wiregate_common::{GatewayError, Result};

const CLEANUP_EVERY_OPS: u64 = 512;

/// Map from `(account, peer, content-hash)` to the last accepted send time.
pub struct DuplicateGuard {
    entries: DashMap<String, Instant>,
    window: Duration,
    capacity: usize,
    ops: std::sync::atomic::AtomicU64,
}

impl DuplicateGuard {
    #[must_use]
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            window,
            capacity,
            ops: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Reject the send if an identical one was accepted within the window;
    /// otherwise record it as the latest.
    pub fn check_and_record(&self, account_id: &str, peer: &str, body: &str) -> Result<()> {
        self.check_and_record_at(account_id, peer, body, Instant::now())
    }

    fn check_and_record_at(
        &self,
        account_id: &str,
        peer: &str,
        body: &str,
        now: Instant,
    ) -> Result<()> {
        let key = dup_key(account_id, peer, body);

        if let Some(last) = self.entries.get(&key)
            && now.duration_since(*last) < self.window
        {
            return Err(GatewayError::DuplicateBlocked);
        }

        self.entries.insert(key, now);
        self.cleanup_if_needed(now);
        Ok(())
    }

    fn cleanup_if_needed(&self, now: Instant) {
        use std::sync::atomic::Ordering;

        let seen = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % CLEANUP_EVERY_OPS != 0 && self.entries.len() < self.capacity {
            return;
        }

        let window = self.window;
        self.entries
            .retain(|_, last| now.duration_since(*last) < window);

        // Still over the bound after evicting expired entries: drop the map.
        // Equivalent to a restart, which the design accepts.
        if self.entries.len() >= self.capacity {
            self.entries.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `account:peer:sha256(body)[:16]`.
fn dup_key(account_id: &str, peer: &str, body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let hash16: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{account_id}:{peer}:{hash16}")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> DuplicateGuard {
        DuplicateGuard::new(Duration::from_secs(60), 10_000)
    }

    #[test]
    fn identical_send_within_window_is_blocked() {
        let guard = guard();
        let t0 = Instant::now();

        guard.check_and_record_at("a", "919", "hello", t0).unwrap();
        let second = guard.check_and_record_at("a", "919", "hello", t0 + Duration::from_secs(10));
        assert!(matches!(second, Err(GatewayError::DuplicateBlocked)));
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let guard = guard();
        let t0 = Instant::now();
        guard.check_and_record_at("a", "919", "hello", t0).unwrap();

        // 59,999ms: still inside the window.
        assert!(
            guard
                .check_and_record_at("a", "919", "hello", t0 + Duration::from_millis(59_999))
                .is_err()
        );
        // 60,001ms: outside.
        assert!(
            guard
                .check_and_record_at("a", "919", "hello", t0 + Duration::from_millis(60_001))
                .is_ok()
        );
    }

    #[test]
    fn different_peer_body_or_account_is_not_a_duplicate() {
        let guard = guard();
        let t0 = Instant::now();
        guard.check_and_record_at("a", "919", "hello", t0).unwrap();

        guard.check_and_record_at("a", "918", "hello", t0).unwrap();
        guard.check_and_record_at("a", "919", "hello!", t0).unwrap();
        guard.check_and_record_at("b", "919", "hello", t0).unwrap();
    }

    #[test]
    fn expired_entries_are_evicted() {
        let guard = DuplicateGuard::new(Duration::from_secs(60), 4);
        let t0 = Instant::now();
        for i in 0..4 {
            guard
                .check_and_record_at("a", &format!("peer-{i}"), "x", t0)
                .unwrap();
        }
        assert_eq!(guard.len(), 4);

        // All four are past the window by now; the next insert cleans up.
        let later = t0 + Duration::from_secs(120);
        guard.check_and_record_at("a", "peer-new", "x", later).unwrap();
        assert_eq!(guard.len(), 1);
    }
}
