//! SQLite persistence for the gateway: accounts (with their serialized auth
//! blobs), webhook subscriptions, the durable delivery queue, and the
//! wire-message retry table.

pub mod accounts;
pub mod queue;
pub mod retry;
pub mod rows;
pub mod webhooks;
pub mod wire_messages;

use {
    anyhow::{Context, Result},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
};

pub use {
    accounts::AccountStore,
    queue::{NewDeliveryJob, QueueStore},
    retry::with_store_retries,
    rows::{AccountRow, DeliveryJobRow, Direction, JobStatus, WebhookRow, WireMessageRow},
    webhooks::WebhookStore,
    wire_messages::WireMessageStore,
};

/// Open a pool against `database_url` and run migrations.
pub async fn open_pool(database_url: &str) -> Result<SqlitePool> {
    // An in-memory database exists per connection; more than one connection
    // in the pool would hand out empty databases.
    let max_connections = if database_url.contains(":memory:") || database_url.contains("mode=memory")
    {
        1
    } else {
        5
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to SQLite")?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run database migrations for the store crate.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
