//! Typing simulation timing.
//!
//! Before a send the runtime subscribes presence, emits `composing`, waits a
//! human-plausible duration, then emits `paused`. Presence failures never
//! block the send itself.

use std::time::Duration;

use rand::Rng;

/// Plausible human typing rate.
const CHARS_PER_SEC: f64 = 3.3;
const MIN_TYPING_MS: u64 = 1_500;
const MAX_TYPING_MS: u64 = 8_000;
const TYPING_JITTER_MAX_MS: u64 = 2_000;

/// How long to stay in `composing` for a message of `body_len` characters.
#[must_use]
pub fn typing_plan(body_len: usize) -> Duration {
    let base_ms = (body_len as f64 / CHARS_PER_SEC * 1000.0) as u64;
    let clamped = base_ms.clamp(MIN_TYPING_MS, MAX_TYPING_MS);
    let jitter = rand::rng().random_range(0..=TYPING_JITTER_MAX_MS);
    Duration::from_millis(clamped + jitter)
}
