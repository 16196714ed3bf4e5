//! Account rows: identity, lifecycle status, and the persisted auth blob.

use {
    anyhow::{Result, bail},
    rand::Rng,
    sqlx::{Row, SqlitePool},
    tracing::info,
};

use wiregate_common::{AccountStatus, time::now_ms};

use crate::rows::AccountRow;

const API_KEY_PREFIX: &str = "wg_";
const API_KEY_HEX_LEN: usize = 48;

/// Persistence for account rows.
#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an account with a fresh id and API key.
    pub async fn create(&self, name: &str, description: &str) -> Result<AccountRow> {
        if name.trim().is_empty() {
            bail!("account name must not be empty");
        }

        let now = now_ms();
        let id = uuid::Uuid::new_v4().to_string();
        let api_key = generate_api_key();

        sqlx::query(
            "INSERT INTO accounts
                 (id, name, description, status, api_key, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, '{}', ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(description)
        .bind(AccountStatus::Disconnected.as_str())
        .bind(&api_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(account_id = %id, name, "account created");
        self.get(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account vanished after insert"))
    }

    pub async fn get(&self, id: &str) -> Result<Option<AccountRow>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| AccountRow::from_sqlite(&r)))
    }

    pub async fn get_by_api_key(&self, api_key: &str) -> Result<Option<AccountRow>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| AccountRow::from_sqlite(&r)))
    }

    pub async fn list(&self) -> Result<Vec<AccountRow>> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(AccountRow::from_sqlite).collect())
    }

    pub async fn update_status(&self, id: &str, status: AccountStatus) -> Result<()> {
        sqlx::query("UPDATE accounts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the network phone id. Set-once: a non-null value never changes.
    pub async fn set_phone_once(&self, id: &str, phone: &str) -> Result<()> {
        sqlx::query(
            "UPDATE accounts
             SET phone_number = COALESCE(phone_number, ?), updated_at = ?
             WHERE id = ?",
        )
        .bind(phone)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_profile(&self, id: &str, name: &str, description: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE accounts SET name = ?, description = ?, updated_at = ? WHERE id = ?",
        )
        .bind(name)
        .bind(description)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("account not found: {id}");
        }
        Ok(())
    }

    pub async fn set_metadata(&self, id: &str, metadata: &serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE accounts SET metadata = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(metadata)?)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Issue a fresh API key, invalidating the old one.
    pub async fn rotate_api_key(&self, id: &str) -> Result<String> {
        let api_key = generate_api_key();
        let result = sqlx::query("UPDATE accounts SET api_key = ?, updated_at = ? WHERE id = ?")
            .bind(&api_key)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("account not found: {id}");
        }
        Ok(api_key)
    }

    /// Overwrite the persisted auth blob. The blob is always written whole,
    /// never merged.
    pub async fn save_session(&self, id: &str, blob_b64: &str) -> Result<()> {
        let now = now_ms();
        let result = sqlx::query(
            "UPDATE accounts
             SET session_data = ?, last_session_saved = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(blob_b64)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("account not found: {id}");
        }
        Ok(())
    }

    pub async fn load_session(&self, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT session_data FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("session_data")))
    }

    pub async fn clear_session(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE accounts
             SET session_data = NULL, last_session_saved = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete the account and everything hanging off it. Queue rows are left
    /// alone: in-flight deliveries may still complete.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM webhooks WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM wire_messages WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            bail!("account not found: {id}");
        }
        info!(account_id = %id, "account deleted");
        Ok(())
    }
}

fn generate_api_key() -> String {
    let mut rng = rand::rng();
    let hex: String = (0..API_KEY_HEX_LEN)
        .map(|_| {
            let nibble = rng.random_range(0..16u8);
            char::from_digit(nibble as u32, 16).unwrap_or('0')
        })
        .collect();
    format!("{API_KEY_PREFIX}{hex}")
}
