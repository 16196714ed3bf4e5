//! The durable webhook delivery queue.
//!
//! Single-claimer discipline: a job leaves `pending|failed` only through the
//! conditional update in [`QueueStore::claim`], so two workers can never run
//! the same attempt.

use {
    anyhow::{Result, bail},
    sqlx::SqlitePool,
    tracing::{debug, warn},
};

use wiregate_common::time::now_ms;

use crate::rows::{DeliveryJobRow, JobStatus};

/// Parameters for a fresh queue row.
#[derive(Debug, Clone)]
pub struct NewDeliveryJob {
    pub account_id: String,
    pub webhook_id: Option<String>,
    pub webhook_url: String,
    pub webhook_secret: Option<String>,
    pub payload: serde_json::Value,
    pub max_retries: u32,
}

/// Persistence for delivery jobs.
#[derive(Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a job, due immediately.
    pub async fn enqueue(&self, job: NewDeliveryJob) -> Result<DeliveryJobRow> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();

        sqlx::query(
            "INSERT INTO webhook_delivery_queue
                 (id, account_id, webhook_id, webhook_url, webhook_secret, payload,
                  status, attempt_count, max_retries, next_attempt_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&job.account_id)
        .bind(&job.webhook_id)
        .bind(&job.webhook_url)
        .bind(&job.webhook_secret)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.max_retries as i64)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %id, account_id = %job.account_id, "delivery job enqueued");
        self.get(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job vanished after insert"))
    }

    pub async fn get(&self, id: &str) -> Result<Option<DeliveryJobRow>> {
        let row = sqlx::query("SELECT * FROM webhook_delivery_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| DeliveryJobRow::from_sqlite(&r)))
    }

    /// Jobs ready to attempt, oldest due first.
    pub async fn due_batch(&self, limit: u32) -> Result<Vec<DeliveryJobRow>> {
        let rows = sqlx::query(
            "SELECT * FROM webhook_delivery_queue
             WHERE status IN ('pending', 'failed') AND next_attempt_at <= ?
             ORDER BY next_attempt_at
             LIMIT ?",
        )
        .bind(now_ms())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(DeliveryJobRow::from_sqlite).collect())
    }

    /// Conditionally transition `pending|failed → processing`, incrementing
    /// the attempt count. Returns false when another worker won the race.
    pub async fn claim(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE webhook_delivery_queue
             SET status = 'processing', attempt_count = attempt_count + 1, updated_at = ?
             WHERE id = ? AND status IN ('pending', 'failed')",
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_success(&self, id: &str, response_status: u16) -> Result<()> {
        self.finish(id, JobStatus::Success, None, Some(response_status as i64), None)
            .await
    }

    /// Schedule another attempt at `next_attempt_at`.
    pub async fn mark_failed(&self, id: &str, next_attempt_at: i64, last_error: &str) -> Result<()> {
        self.finish(
            id,
            JobStatus::Failed,
            Some(last_error),
            None,
            Some(next_attempt_at),
        )
        .await
    }

    pub async fn mark_dead_letter(&self, id: &str, last_error: &str) -> Result<()> {
        self.finish(id, JobStatus::DeadLetter, Some(last_error), None, None)
            .await
    }

    async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        last_error: Option<&str>,
        response_status: Option<i64>,
        next_attempt_at: Option<i64>,
    ) -> Result<()> {
        // Terminal rows never transition again; the guard below keeps a
        // late-finishing worker from resurrecting one.
        let result = sqlx::query(
            "UPDATE webhook_delivery_queue
             SET status = ?, last_error = ?, response_status = ?,
                 next_attempt_at = COALESCE(?, next_attempt_at), updated_at = ?
             WHERE id = ? AND status NOT IN ('success', 'dead_letter')",
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(response_status)
        .bind(next_attempt_at)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("job not found or already terminal: {id}");
        }
        Ok(())
    }

    /// Reset abandoned `processing` rows so the worker retries them.
    pub async fn recover_stuck(&self, staleness_ms: i64) -> Result<u64> {
        let now = now_ms();
        let result = sqlx::query(
            "UPDATE webhook_delivery_queue
             SET status = 'failed', next_attempt_at = ?, last_error = 'recovered', updated_at = ?
             WHERE status = 'processing' AND updated_at < ?",
        )
        .bind(now)
        .bind(now)
        .bind(now - staleness_ms)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(recovered, "reset stuck delivery jobs");
        }
        Ok(recovered)
    }

    /// Drop terminal rows older than `cutoff_ms` (housekeeping).
    pub async fn prune_terminal_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM webhook_delivery_queue
             WHERE status IN ('success', 'dead_letter') AND updated_at < ?",
        )
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_pool;

    fn job(account: &str) -> NewDeliveryJob {
        NewDeliveryJob {
            account_id: account.into(),
            webhook_id: Some("hook-1".into()),
            webhook_url: "https://example.com/in".into(),
            webhook_secret: Some("snapshot".into()),
            payload: serde_json::json!({"event": "message"}),
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn enqueue_then_claim_once() {
        let store = QueueStore::with_pool(memory_pool().await);
        let row = store.enqueue(job("acc-1")).await.unwrap();

        assert_eq!(row.status, JobStatus::Pending);
        assert_eq!(row.attempt_count, 0);

        let due = store.due_batch(10).await.unwrap();
        assert_eq!(due.len(), 1);

        assert!(store.claim(&row.id).await.unwrap());
        // Second claim must lose: the row is already processing.
        assert!(!store.claim(&row.id).await.unwrap());

        let claimed = store.get(&row.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempt_count, 1);
    }

    #[tokio::test]
    async fn failed_jobs_return_to_the_batch_when_due() {
        let store = QueueStore::with_pool(memory_pool().await);
        let row = store.enqueue(job("acc-1")).await.unwrap();

        store.claim(&row.id).await.unwrap();
        store
            .mark_failed(&row.id, now_ms() - 1, "503 from subscriber")
            .await
            .unwrap();

        let due = store.due_batch(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, JobStatus::Failed);

        // A failed job with a future next_attempt_at stays out of the batch.
        store.claim(&row.id).await.unwrap();
        store
            .mark_failed(&row.id, now_ms() + 60_000, "still down")
            .await
            .unwrap();
        assert!(store.due_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_states_are_final() {
        let store = QueueStore::with_pool(memory_pool().await);
        let row = store.enqueue(job("acc-1")).await.unwrap();

        store.claim(&row.id).await.unwrap();
        store.mark_success(&row.id, 200).await.unwrap();

        // No further transition out of success.
        assert!(!store.claim(&row.id).await.unwrap());
        assert!(store.mark_failed(&row.id, now_ms(), "x").await.is_err());

        let done = store.get(&row.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Success);
        assert_eq!(done.response_status, Some(200));
    }

    #[tokio::test]
    async fn dead_letter_keeps_error_text() {
        let store = QueueStore::with_pool(memory_pool().await);
        let row = store.enqueue(job("acc-1")).await.unwrap();

        store.claim(&row.id).await.unwrap();
        store
            .mark_dead_letter(&row.id, "permanent: HTTP 410")
            .await
            .unwrap();

        let dead = store.get(&row.id).await.unwrap().unwrap();
        assert_eq!(dead.status, JobStatus::DeadLetter);
        assert_eq!(dead.last_error.as_deref(), Some("permanent: HTTP 410"));
        assert_eq!(dead.response_status, None);
    }

    #[tokio::test]
    async fn stuck_processing_rows_are_recovered() {
        let store = QueueStore::with_pool(memory_pool().await);
        let row = store.enqueue(job("acc-1")).await.unwrap();
        store.claim(&row.id).await.unwrap();

        // Fresh processing row is left alone.
        assert_eq!(store.recover_stuck(300_000).await.unwrap(), 0);

        // With a zero staleness window everything processing is stale.
        assert_eq!(store.recover_stuck(-1).await.unwrap(), 1);
        let recovered = store.get(&row.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, JobStatus::Failed);
        assert_eq!(recovered.last_error.as_deref(), Some("recovered"));
    }
}
