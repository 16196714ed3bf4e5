//! Webhook-reply loop guard.
//!
//! A subscriber that answers every inbound event with a reply call can ping
//! itself into an infinite conversation. Each `(account, number)` pair gets
//! a small fixed-window budget.

use std::time::Duration;

use {
    dashmap::{DashMap, mapref::entry::Entry},
    tokio::time::Instant,
};

use wiregate_common::{GatewayError, Result};

const CLEANUP_EVERY_OPS: u64 = 512;

#[derive(Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: u32,
}

/// Fixed-window counter per `(account, number)`.
pub struct ReplyLoopGuard {
    max_per_window: u32,
    window: Duration,
    buckets: DashMap<String, WindowState>,
    ops: std::sync::atomic::AtomicU64,
}

impl ReplyLoopGuard {
    #[must_use]
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            buckets: DashMap::new(),
            ops: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// The production limit: 10 replies per minute per conversation.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(10, Duration::from_secs(60))
    }

    pub fn check(&self, account_id: &str, number: &str) -> Result<()> {
        self.check_at(account_id, number, Instant::now())
    }

    fn check_at(&self, account_id: &str, number: &str, now: Instant) -> Result<()> {
        let key = format!("{account_id}:{number}");
        let decision = match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                if now.duration_since(state.started_at) >= self.window {
                    state.started_at = now;
                    state.count = 1;
                    Ok(())
                } else if state.count < self.max_per_window {
                    state.count += 1;
                    Ok(())
                } else {
                    let retry_after = self
                        .window
                        .saturating_sub(now.duration_since(state.started_at))
                        .as_secs()
                        .max(1);
                    Err(GatewayError::HourlyCap { retry_after })
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                Ok(())
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        use std::sync::atomic::Ordering;

        let seen = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % CLEANUP_EVERY_OPS != 0 {
            return;
        }
        let stale_after = self.window.saturating_mul(3);
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhausts_then_reopens() {
        let guard = ReplyLoopGuard::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        guard.check_at("a", "919", t0).unwrap();
        guard.check_at("a", "919", t0).unwrap();
        assert!(guard.check_at("a", "919", t0).is_err());

        // A fresh window clears the counter.
        guard
            .check_at("a", "919", t0 + Duration::from_secs(61))
            .unwrap();
    }

    #[test]
    fn conversations_are_independent() {
        let guard = ReplyLoopGuard::new(1, Duration::from_secs(60));
        let t0 = Instant::now();

        guard.check_at("a", "919", t0).unwrap();
        guard.check_at("a", "918", t0).unwrap();
        guard.check_at("b", "919", t0).unwrap();
        assert!(guard.check_at("a", "919", t0).is_err());
    }

    #[test]
    fn denial_carries_a_retry_hint() {
        let guard = ReplyLoopGuard::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        guard.check_at("a", "919", t0).unwrap();

        match guard.check_at("a", "919", t0 + Duration::from_secs(20)) {
            Err(GatewayError::HourlyCap { retry_after }) => {
                assert!(retry_after >= 39 && retry_after <= 40, "hint {retry_after}");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }
}
