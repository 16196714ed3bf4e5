//! Custody of per-account authentication state.
//!
//! The protocol library works against a scratch directory of credential and
//! key files; the store holds one opaque versioned blob per account. This
//! crate owns the blob codec, the directory snapshot/restore rules, the
//! instance-ownership lock embedded in the blob, and the debounced
//! single-writer saver.

pub mod blob;
pub mod dir;
pub mod lock;
pub mod saver;
pub mod session;

pub use {
    blob::{AuthBlob, CURRENT_VERSION},
    lock::{LockCheck, instance_id},
    saver::DebouncedSaver,
    session::{RestoreOutcome, SessionVault},
};
