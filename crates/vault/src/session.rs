//! The restore/save contracts tying blobs, directories, and the store
//! together.

use std::path::{Path, PathBuf};

use {anyhow::Result, tracing::{info, warn}};

use {
    wiregate_common::GatewayError,
    wiregate_store::{AccountStore, with_store_retries},
};

use crate::{
    blob::AuthBlob,
    dir,
    lock::{self, LockCheck},
};

/// What a restore attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The local directory was fresh enough to trust as-is; the store copy
    /// was not consulted.
    UsedLocal,
    /// The store blob was written into the local directory.
    Restored,
    /// Neither side has usable auth state; QR pairing is required.
    NeedsPairing,
}

/// Auth-state custody for all accounts of this process.
#[derive(Clone)]
pub struct SessionVault {
    accounts: AccountStore,
    data_dir: PathBuf,
    stale_lock_ms: i64,
}

impl SessionVault {
    #[must_use]
    pub fn new(accounts: AccountStore, data_dir: PathBuf, stale_lock_ms: i64) -> Self {
        Self {
            accounts,
            data_dir,
            stale_lock_ms,
        }
    }

    #[must_use]
    pub fn auth_dir(&self, account_id: &str) -> PathBuf {
        dir::auth_dir(&self.data_dir, account_id)
    }

    /// Restore auth state for `account_id` into its local directory.
    ///
    /// A recently-touched local directory wins outright: overwriting it could
    /// destroy a handshake in progress. Otherwise the store blob is
    /// validated, checked for foreign ownership, and written out whole. An
    /// invalid blob is cleared from the store so the account pairs afresh.
    pub async fn restore(&self, account_id: &str) -> Result<RestoreOutcome, GatewayError> {
        let auth_dir = self.auth_dir(account_id);

        if dir::is_fresh(&auth_dir) {
            info!(account_id, "local auth directory is fresh, skipping store restore");
            return Ok(RestoreOutcome::UsedLocal);
        }

        let encoded = with_store_retries("load_session", || async {
            self.accounts.load_session(account_id).await
        })
        .await?;

        let Some(encoded) = encoded else {
            return Ok(RestoreOutcome::NeedsPairing);
        };

        let blob = match AuthBlob::decode(&encoded) {
            Ok(blob) if blob.is_usable() => blob,
            Ok(_) => {
                warn!(account_id, "stored auth blob failed validation, clearing");
                self.clear_store_blob(account_id).await?;
                return Ok(RestoreOutcome::NeedsPairing);
            },
            Err(err) => {
                warn!(account_id, error = %err, "stored auth blob unreadable, clearing");
                self.clear_store_blob(account_id).await?;
                return Ok(RestoreOutcome::NeedsPairing);
            },
        };

        match lock::check(&blob, lock::instance_id(), self.stale_lock_ms) {
            LockCheck::Held { holder } => {
                warn!(account_id, holder, "account is locked by another instance");
                return Err(GatewayError::LockedByOtherInstance);
            },
            LockCheck::Stale { holder } => {
                info!(account_id, holder, "taking over stale ownership lock");
            },
            LockCheck::Free | LockCheck::Mine => {},
        }

        dir::restore(&blob, &auth_dir)
            .await
            .map_err(|e| GatewayError::internal(format!("auth restore failed: {e}")))?;
        Ok(RestoreOutcome::Restored)
    }

    /// Snapshot the local directory into one blob, stamp our ownership lock,
    /// and UPSERT it. Returns false when there is nothing to save yet.
    pub async fn save(&self, account_id: &str) -> Result<bool> {
        let auth_dir = self.auth_dir(account_id);
        let Some(mut blob) = dir::snapshot(&auth_dir).await? else {
            return Ok(false);
        };

        blob.claim(lock::instance_id());
        let encoded = blob.encode()?;

        with_store_retries("save_session", || async {
            self.accounts.save_session(account_id, &encoded).await
        })
        .await
        .map_err(anyhow::Error::from)?;
        Ok(true)
    }

    /// Drop auth state on both sides (logout, deletion).
    pub async fn clear(&self, account_id: &str) -> Result<()> {
        dir::clear(&self.auth_dir(account_id)).await?;
        self.clear_store_blob(account_id)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn clear_store_blob(&self, account_id: &str) -> Result<(), GatewayError> {
        with_store_retries("clear_session", || async {
            self.accounts.clear_session(account_id).await
        })
        .await
    }

    /// Whether the store currently holds a usable blob for the account.
    pub async fn has_usable_blob(&self, account_id: &str) -> Result<bool> {
        let Some(encoded) = self.accounts.load_session(account_id).await? else {
            return Ok(false);
        };
        Ok(AuthBlob::decode(&encoded)
            .map(|blob| blob.is_usable())
            .unwrap_or(false))
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
