//! Reconnect policy: cause classes and their budgets.
//!
//! Connection-replaced is deliberately throttled to two attempts per rolling
//! hour. Hammering reconnects after another device takes the session over is
//! exactly the pattern the network bans on, so the cap is policy, not tuning.

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

use {wiregate_pacer::stagger::reconnect_jitter, wiregate_protocol::DisconnectCause};

const REPLACED_WINDOW: Duration = Duration::from_secs(3600);
const REPLACED_MAX_PER_WINDOW: usize = 2;
const REPLACED_FIRST_DELAY: Duration = Duration::from_secs(30);
const REPLACED_SECOND_DELAY: Duration = Duration::from_secs(600);

/// What to do after a transport close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Reconnect after the delay. `reread_store` stays false mid-pairing so
    /// half-built handshake keys survive the socket rebuild.
    Retry { delay: Duration, reread_store: bool },
    /// Terminal for this run: clear auth and require a fresh pairing.
    Logout,
    /// Budget exhausted; surface this reason and stop.
    GiveUp { reason: String },
}

/// Per-runtime reconnect bookkeeping.
pub struct ReconnectPolicy {
    replaced_attempts: VecDeque<Instant>,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            replaced_attempts: VecDeque::new(),
        }
    }

    /// Decide the response to a close. `pairing` is true while the runtime
    /// never reached `Ready` on this socket (QR still on screen).
    pub fn plan(&mut self, cause: DisconnectCause, pairing: bool) -> Plan {
        self.plan_at(cause, pairing, Instant::now())
    }

    fn plan_at(&mut self, cause: DisconnectCause, pairing: bool, now: Instant) -> Plan {
        match cause {
            DisconnectCause::LoggedOut => Plan::Logout,

            DisconnectCause::ConnectionReplaced => {
                while self
                    .replaced_attempts
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= REPLACED_WINDOW)
                {
                    self.replaced_attempts.pop_front();
                }

                if self.replaced_attempts.len() >= REPLACED_MAX_PER_WINDOW {
                    return Plan::GiveUp {
                        reason: "session taken over by another device; close other sessions \
                                 and wait at least an hour before reconnecting"
                            .to_string(),
                    };
                }

                let delay = if self.replaced_attempts.is_empty() {
                    REPLACED_FIRST_DELAY
                } else {
                    REPLACED_SECOND_DELAY
                };
                self.replaced_attempts.push_back(now);
                Plan::Retry {
                    delay,
                    reread_store: false,
                }
            },

            DisconnectCause::RestartRequired | DisconnectCause::ConnectionClosed if pairing => {
                Plan::Retry {
                    delay: reconnect_jitter(15, 30),
                    reread_store: false,
                }
            },

            _ => Plan::Retry {
                delay: reconnect_jitter(10, 20),
                reread_store: false,
            },
        }
    }

    /// Called on a successful `Ready`.
    pub fn reset(&mut self) {
        // The replaced window intentionally survives: two takeovers inside
        // an hour still exhaust the budget even with a Ready in between.
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_out_is_terminal() {
        let mut policy = ReconnectPolicy::new();
        assert_eq!(
            policy.plan_at(DisconnectCause::LoggedOut, false, Instant::now()),
            Plan::Logout
        );
    }

    #[test]
    fn replaced_backs_off_then_gives_up() {
        let mut policy = ReconnectPolicy::new();
        let now = Instant::now();

        match policy.plan_at(DisconnectCause::ConnectionReplaced, false, now) {
            Plan::Retry { delay, .. } => assert_eq!(delay, REPLACED_FIRST_DELAY),
            other => panic!("unexpected: {other:?}"),
        }
        match policy.plan_at(DisconnectCause::ConnectionReplaced, false, now) {
            Plan::Retry { delay, .. } => assert_eq!(delay, REPLACED_SECOND_DELAY),
            other => panic!("unexpected: {other:?}"),
        }
        match policy.plan_at(DisconnectCause::ConnectionReplaced, false, now) {
            Plan::GiveUp { reason } => assert!(reason.contains("another device")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn replaced_budget_refills_after_an_hour() {
        let mut policy = ReconnectPolicy::new();
        let now = Instant::now();

        policy.plan_at(DisconnectCause::ConnectionReplaced, false, now);
        policy.plan_at(DisconnectCause::ConnectionReplaced, false, now);

        let later = now + REPLACED_WINDOW + Duration::from_secs(1);
        match policy.plan_at(DisconnectCause::ConnectionReplaced, false, later) {
            Plan::Retry { delay, .. } => assert_eq!(delay, REPLACED_FIRST_DELAY),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pairing_closes_keep_local_state() {
        let mut policy = ReconnectPolicy::new();
        let now = Instant::now();

        for cause in [
            DisconnectCause::RestartRequired,
            DisconnectCause::ConnectionClosed,
        ] {
            match policy.plan_at(cause, true, now) {
                Plan::Retry { delay, reread_store } => {
                    assert!(!reread_store);
                    assert!(delay >= Duration::from_secs(15));
                    assert!(delay <= Duration::from_secs(30));
                },
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn ordinary_closes_retry_with_short_jitter() {
        let mut policy = ReconnectPolicy::new();
        match policy.plan_at(DisconnectCause::Other(428), false, Instant::now()) {
            Plan::Retry { delay, .. } => {
                assert!(delay >= Duration::from_secs(10));
                assert!(delay <= Duration::from_secs(20));
            },
            other => panic!("unexpected: {other:?}"),
        }
    }
}
