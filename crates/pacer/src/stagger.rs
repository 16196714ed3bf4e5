//! Connect staggering and presence-refresh jitter.
//!
//! Synchronized reconnect of many accounts from one IP is a primary ban
//! signal, so connects are spaced 30–60s apart and capped per rolling
//! window. Presence refreshes are jittered per account so no two accounts
//! ever announce themselves in the same instant.

use std::{collections::VecDeque, time::Duration};

use {
    rand::Rng,
    tokio::{sync::Mutex, time::Instant},
};

/// Gate handing out connect slots to the supervisor.
pub struct StaggerGate {
    max_per_window: u32,
    window: Duration,
    gap_min: Duration,
    gap_max: Duration,
    scheduled: Mutex<VecDeque<Instant>>,
}

impl StaggerGate {
    #[must_use]
    pub fn new(max_per_window: u32, window: Duration, gap_min: Duration, gap_max: Duration) -> Self {
        Self {
            max_per_window,
            window,
            gap_min,
            gap_max,
            scheduled: Mutex::new(VecDeque::new()),
        }
    }

    /// Reserve the next connect slot and return how long to wait for it.
    pub async fn reserve(&self) -> Duration {
        self.reserve_at(Instant::now()).await
    }

    async fn reserve_at(&self, now: Instant) -> Duration {
        let mut scheduled = self.scheduled.lock().await;

        let mut at = now;

        // Keep the jittered gap from the previous slot.
        if let Some(&last) = scheduled.back() {
            let gap = self.jittered_gap();
            if last + gap > at {
                at = last + gap;
            }
        }

        // Respect the per-window cap, measured at the candidate time.
        while scheduled
            .front()
            .is_some_and(|&t| at.duration_since(t) >= self.window)
        {
            scheduled.pop_front();
        }
        if scheduled.len() >= self.max_per_window as usize
            && let Some(&oldest) = scheduled.front()
        {
            at = at.max(oldest + self.window);
            scheduled.pop_front();
        }

        scheduled.push_back(at);
        at.saturating_duration_since(now)
    }

    fn jittered_gap(&self) -> Duration {
        let min = self.gap_min.as_millis() as u64;
        let max = self.gap_max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max.max(min)))
    }
}

/// Independent per-account delay before the first `available` presence and
/// between refreshes.
#[must_use]
pub fn presence_refresh_delay(min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::rng().random_range(min_ms..=max_ms.max(min_ms)))
}

/// Uniform reconnect jitter within a half-open range of seconds.
#[must_use]
pub fn reconnect_jitter(min_secs: u64, max_secs: u64) -> Duration {
    Duration::from_secs(rand::rng().random_range(min_secs..=max_secs.max(min_secs)))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> StaggerGate {
        StaggerGate::new(
            3,
            Duration::from_secs(600),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn first_connect_is_immediate() {
        let gate = gate();
        let wait = gate.reserve_at(Instant::now()).await;
        assert_eq!(wait, Duration::ZERO);
    }

    #[tokio::test]
    async fn consecutive_connects_keep_the_gap() {
        let gate = gate();
        let now = Instant::now();

        let first = gate.reserve_at(now).await;
        let second = gate.reserve_at(now).await;
        assert_eq!(first, Duration::ZERO);
        assert!(second >= Duration::from_secs(30), "gap was {second:?}");
        assert!(second <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn fourth_connect_waits_for_the_window() {
        let gate = gate();
        let now = Instant::now();

        for _ in 0..3 {
            gate.reserve_at(now).await;
        }
        let fourth = gate.reserve_at(now).await;
        // Slot one opened at t=0; the window frees it again at t=600.
        assert!(fourth >= Duration::from_secs(600), "wait was {fourth:?}");
    }

    #[test]
    fn presence_delay_stays_in_range() {
        for _ in 0..32 {
            let d = presence_refresh_delay(Duration::from_secs(1800), Duration::from_secs(3600));
            assert!(d >= Duration::from_secs(1800));
            assert!(d <= Duration::from_secs(3600));
        }
    }

    #[test]
    fn reconnect_jitter_stays_in_range() {
        for _ in 0..32 {
            let d = reconnect_jitter(10, 20);
            assert!(d >= Duration::from_secs(10));
            assert!(d <= Duration::from_secs(20));
        }
    }
}
