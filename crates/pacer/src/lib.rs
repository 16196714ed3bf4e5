//! Behavioral camouflage: send pacing, duplicate suppression, typing
//! simulation, client fingerprints, and connect staggering.
//!
//! Every outbound send passes through [`Pacer`] before it reaches the
//! transport. Bypassing it is a correctness bug, not an optimization: the
//! network bans on exactly the patterns this crate prevents.

pub mod admission;
pub mod duplicate;
pub mod fingerprint;
pub mod loop_guard;
pub mod stagger;
pub mod typing;

pub use {
    admission::{Admission, Pacer},
    duplicate::DuplicateGuard,
    fingerprint::derive_fingerprint,
    loop_guard::ReplyLoopGuard,
    stagger::StaggerGate,
    typing::typing_plan,
};
