//! Snapshot and restore between the library's auth scratch directory and the
//! blob form. All file IO runs on the blocking pool.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};

use crate::blob::AuthBlob;

const CREDS_FILE: &str = "creds.json";

/// A local directory whose credentials file was touched within this window
/// is presumed to belong to a live handshake and wins over the store copy.
pub const LOCAL_FRESHNESS: Duration = Duration::from_secs(5 * 60);

/// Serialize the complete auth directory (credentials plus every key file).
///
/// Returns `None` when the directory holds no credentials file yet: pairing
/// has not produced anything worth persisting.
pub async fn snapshot(dir: &Path) -> Result<Option<AuthBlob>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || snapshot_blocking(&dir)).await?
}

fn snapshot_blocking(dir: &Path) -> Result<Option<AuthBlob>> {
    let creds_path = dir.join(CREDS_FILE);
    if !creds_path.exists() {
        return Ok(None);
    }

    let creds: serde_json::Value = read_json(&creds_path)?;
    let mut keys = BTreeMap::new();

    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == CREDS_FILE || !name.ends_with(".json") {
            continue;
        }
        keys.insert(name, read_json(&entry.path())?);
    }

    Ok(Some(AuthBlob::new(creds, keys)))
}

/// Empty `dir` and write the blob's files into it. The directory afterwards
/// contains exactly the blob's contents, nothing else.
pub async fn restore(blob: &AuthBlob, dir: &Path) -> Result<()> {
    let blob = blob.clone();
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || restore_blocking(&blob, &dir)).await?
}

fn restore_blocking(blob: &AuthBlob, dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("clearing {}", dir.display()))?;
    }
    fs::create_dir_all(dir)?;

    write_json(&dir.join(CREDS_FILE), &blob.creds)?;
    for (name, content) in &blob.keys {
        write_json(&dir.join(name), content)?;
    }
    Ok(())
}

/// Remove the auth directory entirely (logout, account deletion).
pub async fn clear(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("clearing {}", dir.display()))?;
        }
        Ok(())
    })
    .await?
}

/// Whether the directory's credentials file was modified within
/// [`LOCAL_FRESHNESS`] of now.
pub fn is_fresh(dir: &Path) -> bool {
    let Ok(meta) = fs::metadata(dir.join(CREDS_FILE)) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age < LOCAL_FRESHNESS)
        .unwrap_or(true)
}

/// Per-account auth directory under the configured data dir.
#[must_use]
pub fn auth_dir(data_dir: &Path, account_id: &str) -> PathBuf {
    // Account ids are UUIDs, but sanitize anyway before using one as a path
    // component.
    let safe: String = account_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    data_dir.join("auth").join(safe)
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let raw = serde_json::to_vec(value)?;
    fs::write(path, raw).with_context(|| format!("writing {}", path.display()))
}
