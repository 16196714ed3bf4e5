//! Stable per-account client fingerprints.
//!
//! The network profiles the client identity tuple each session presents.
//! One account must look like the same browser forever; two accounts on one
//! host must not look alike. Deriving from a hash of the account id gives
//! both without persisting anything.

use sha2::{Digest, Sha256};

use wiregate_protocol::ClientFingerprint;

const DEVICE_LABELS: &[&str] = &[
    "Ubuntu", "Fedora", "Debian", "Arch Linux", "macOS", "Windows", "Mint", "openSUSE",
];

const BROWSERS: &[&str] = &["Chrome", "Firefox", "Edge", "Safari", "Opera", "Brave"];

/// Derive the client identity tuple for an account. Pure function of the id.
#[must_use]
pub fn derive_fingerprint(account_id: &str) -> ClientFingerprint {
    let digest = Sha256::digest(account_id.as_bytes());

    let device = DEVICE_LABELS[digest[0] as usize % DEVICE_LABELS.len()];
    let browser = BROWSERS[digest[1] as usize % BROWSERS.len()];

    // A believable modern major.minor.build triple spread across hash bytes.
    let major = 115 + (digest[2] % 12) as u16;
    let minor = (digest[3] % 2) as u16;
    let build = 4000 + u16::from_be_bytes([digest[4], digest[5]]) % 3000;

    ClientFingerprint {
        device_label: device.to_string(),
        browser: browser.to_string(),
        version: format!("{major}.{minor}.{build}"),
    }
}
