//! Webhook subscription rows.

use {
    anyhow::{Result, bail},
    sqlx::SqlitePool,
    tracing::info,
};

use wiregate_common::time::now_ms;

use crate::rows::WebhookRow;

/// Persistence for webhook subscriptions.
#[derive(Clone)]
pub struct WebhookStore {
    pool: SqlitePool,
}

impl WebhookStore {
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        account_id: &str,
        url: &str,
        secret: Option<&str>,
        events: Option<Vec<String>>,
        is_active: bool,
        max_retries: Option<u32>,
    ) -> Result<WebhookRow> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("webhook url must be http(s): {url}");
        }

        let id = uuid::Uuid::new_v4().to_string();
        let events = events.unwrap_or_else(|| vec!["message".to_string()]);

        sqlx::query(
            "INSERT INTO webhooks
                 (id, account_id, url, secret, events, is_active, max_retries, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(account_id)
        .bind(url)
        .bind(secret)
        .bind(serde_json::to_string(&events)?)
        .bind(is_active as i64)
        .bind(max_retries.map(|v| v as i64))
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        info!(webhook_id = %id, account_id, url, "webhook subscription created");
        self.get(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("webhook vanished after insert"))
    }

    pub async fn get(&self, id: &str) -> Result<Option<WebhookRow>> {
        let row = sqlx::query("SELECT * FROM webhooks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| WebhookRow::from_sqlite(&r)))
    }

    pub async fn list_for_account(&self, account_id: &str) -> Result<Vec<WebhookRow>> {
        let rows = sqlx::query("SELECT * FROM webhooks WHERE account_id = ? ORDER BY created_at")
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(WebhookRow::from_sqlite).collect())
    }

    pub async fn list_active_for_account(&self, account_id: &str) -> Result<Vec<WebhookRow>> {
        let rows = sqlx::query(
            "SELECT * FROM webhooks
             WHERE account_id = ? AND is_active = 1
             ORDER BY created_at",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(WebhookRow::from_sqlite).collect())
    }

    pub async fn set_active(&self, id: &str, is_active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE webhooks SET is_active = ? WHERE id = ?")
            .bind(is_active as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("webhook not found: {id}");
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("webhook not found: {id}");
        }
        Ok(())
    }

    /// Whether `secret` matches any active subscription of the account.
    /// Used to authenticate webhook-reply calls.
    pub async fn secret_matches(&self, account_id: &str, secret: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM webhooks
             WHERE account_id = ? AND is_active = 1 AND secret = ?
             LIMIT 1",
        )
        .bind(account_id)
        .bind(secret)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
