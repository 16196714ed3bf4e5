//! The versioned auth blob and its base64(JSON) codec.

use std::collections::BTreeMap;

use {
    anyhow::{Context, Result, bail},
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    serde::{Deserialize, Serialize},
};

use wiregate_common::time::now_ms;

/// Blobs with a lower version are invalid and get cleared on restore.
pub const CURRENT_VERSION: u32 = 2;

/// The complete persisted auth state for one account.
///
/// Overwritten whole on every save; never merged with a previous blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthBlob {
    pub version: u32,
    /// The library's credentials object. Pairing is complete when
    /// `creds.me.id` is present.
    pub creds: serde_json::Value,
    /// Key-file name to key-file content (ratchet and pre-key material).
    pub keys: BTreeMap<String, serde_json::Value>,
    /// Instance-ownership lock (§ ownership arbitration).
    #[serde(default)]
    pub active_instance_id: Option<String>,
    #[serde(default)]
    pub acquired_at_ms: Option<i64>,
    pub saved_at_ms: i64,
}

impl AuthBlob {
    #[must_use]
    pub fn new(creds: serde_json::Value, keys: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            version: CURRENT_VERSION,
            creds,
            keys,
            active_instance_id: None,
            acquired_at_ms: None,
            saved_at_ms: now_ms(),
        }
    }

    /// `creds.me.id`, the completed-pairing marker.
    #[must_use]
    pub fn me_id(&self) -> Option<&str> {
        self.creds
            .get("me")
            .and_then(|me| me.get("id"))
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// A blob missing its pairing marker, missing key material, or carrying
    /// an outdated schema is treated as absent.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.version >= CURRENT_VERSION && self.me_id().is_some() && !self.keys.is_empty()
    }

    /// Stamp the ownership lock for `instance`.
    pub fn claim(&mut self, instance: &str) {
        self.active_instance_id = Some(instance.to_string());
        self.acquired_at_ms = Some(now_ms());
    }

    /// Serialize to the base64 column form.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).context("auth blob serialization failed")?;
        Ok(BASE64.encode(json))
    }

    /// Parse the base64 column form.
    pub fn decode(encoded: &str) -> Result<Self> {
        let raw = BASE64
            .decode(encoded.trim())
            .context("auth blob is not valid base64")?;
        let blob: Self = serde_json::from_slice(&raw).context("auth blob is not valid JSON")?;
        if blob.version == 0 {
            bail!("auth blob carries no schema version");
        }
        Ok(blob)
    }
}
