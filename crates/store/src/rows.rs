//! Row types and their column mappings.

use std::{fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    sqlx::{Row, sqlite::SqliteRow},
};

/// One tenant endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub phone_number: Option<String>,
    pub api_key: String,
    /// Base64 of the serialized AuthBlob; `None` means never paired.
    pub session_data: Option<String>,
    pub last_session_saved: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AccountRow {
    pub(crate) fn from_sqlite(row: &SqliteRow) -> Self {
        let metadata: String = row.get("metadata");
        Self {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            status: row.get("status"),
            phone_number: row.get("phone_number"),
            api_key: row.get("api_key"),
            session_data: row.get("session_data"),
            last_session_saved: row.get("last_session_saved"),
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// One webhook subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRow {
    pub id: String,
    pub account_id: String,
    pub url: String,
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub is_active: bool,
    pub max_retries: Option<u32>,
    pub created_at: i64,
}

impl WebhookRow {
    pub(crate) fn from_sqlite(row: &SqliteRow) -> Self {
        let events: String = row.get("events");
        Self {
            id: row.get("id"),
            account_id: row.get("account_id"),
            url: row.get("url"),
            secret: row.get("secret"),
            events: serde_json::from_str(&events).unwrap_or_else(|_| vec!["message".to_string()]),
            is_active: row.get::<i64, _>("is_active") != 0,
            max_retries: row
                .try_get::<Option<i64>, _>("max_retries")
                .ok()
                .flatten()
                .map(|v| v as u32),
            created_at: row.get("created_at"),
        }
    }
}

/// Delivery job lifecycle. `Success` and `DeadLetter` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Failed,
    Success,
    DeadLetter,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Success => "success",
            Self::DeadLetter => "dead_letter",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::DeadLetter)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "failed" => Ok(Self::Failed),
            "success" => Ok(Self::Success),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One row of the durable delivery queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJobRow {
    pub id: String,
    pub account_id: String,
    /// Non-owning reference; the subscription may be gone by delivery time.
    pub webhook_id: Option<String>,
    pub webhook_url: String,
    /// Secret snapshot captured at enqueue.
    pub webhook_secret: Option<String>,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub max_retries: u32,
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    pub response_status: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DeliveryJobRow {
    pub(crate) fn from_sqlite(row: &SqliteRow) -> Self {
        let payload: String = row.get("payload");
        let status: String = row.get("status");
        Self {
            id: row.get("id"),
            account_id: row.get("account_id"),
            webhook_id: row.get("webhook_id"),
            webhook_url: row.get("webhook_url"),
            webhook_secret: row.get("webhook_secret"),
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            status: status.parse().unwrap_or(JobStatus::Failed),
            attempt_count: row.get::<i64, _>("attempt_count") as u32,
            max_retries: row.get::<i64, _>("max_retries") as u32,
            next_attempt_at: row.get("next_attempt_at"),
            last_error: row.get("last_error"),
            response_status: row.get("response_status"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

/// Whether a wire message was received or sent by this gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// One recently-seen wire message, stored for resend callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessageRow {
    pub account_id: String,
    pub message_id: String,
    pub direction: Direction,
    pub peer_id: String,
    /// Serialized through the protocol codec only.
    pub body: serde_json::Value,
    pub created_at: i64,
}

impl WireMessageRow {
    pub(crate) fn from_sqlite(row: &SqliteRow) -> Self {
        let body: String = row.get("body");
        let direction: String = row.get("direction");
        Self {
            account_id: row.get("account_id"),
            message_id: row.get("message_id"),
            direction: direction.parse().unwrap_or(Direction::In),
            peer_id: row.get("peer_id"),
            body: serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
            created_at: row.get("created_at"),
        }
    }
}
