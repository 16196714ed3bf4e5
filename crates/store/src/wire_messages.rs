//! Durable tier of the message retry store.

use {anyhow::Result, sqlx::SqlitePool, tracing::debug};

use wiregate_common::time::now_ms;

use crate::rows::{Direction, WireMessageRow};

/// Persistence for recently-seen wire messages.
#[derive(Clone)]
pub struct WireMessageStore {
    pool: SqlitePool,
}

impl WireMessageStore {
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite the row for `(account_id, message_id)`.
    pub async fn upsert(
        &self,
        account_id: &str,
        message_id: &str,
        direction: Direction,
        peer_id: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO wire_messages (account_id, message_id, direction, peer_id, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id, message_id) DO UPDATE SET
                 body = excluded.body, direction = excluded.direction, peer_id = excluded.peer_id",
        )
        .bind(account_id)
        .bind(message_id)
        .bind(direction.as_str())
        .bind(peer_id)
        .bind(serde_json::to_string(body)?)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, account_id: &str, message_id: &str) -> Result<Option<WireMessageRow>> {
        let row = sqlx::query(
            "SELECT * FROM wire_messages WHERE account_id = ? AND message_id = ?",
        )
        .bind(account_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| WireMessageRow::from_sqlite(&r)))
    }

    /// Reclaim rows past the retention horizon.
    pub async fn prune_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM wire_messages WHERE created_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        let pruned = result.rows_affected();
        if pruned > 0 {
            debug!(pruned, "pruned expired wire messages");
        }
        Ok(pruned)
    }
}
