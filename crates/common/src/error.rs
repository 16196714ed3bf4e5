use thiserror::Error;

/// Every error that crosses a component boundary is one of these kinds.
/// Library-specific errors are translated at the boundary that saw them;
/// callers only ever match on this enum.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("identical message to this recipient was sent less than a minute ago")]
    DuplicateBlocked,

    #[error("hourly send cap reached, retry in {retry_after}s")]
    HourlyCap { retry_after: u64 },

    #[error("daily send cap reached, retry in {retry_after}s")]
    DailyCap { retry_after: u64 },

    #[error("account has no usable session, QR pairing required")]
    NeedsQr,

    #[error("account is driven by another gateway instance")]
    LockedByOtherInstance,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("gateway is shutting down")]
    Shutdown,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable kind, used in API bodies and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateBlocked => "duplicate_blocked",
            Self::HourlyCap { .. } => "hourly_cap",
            Self::DailyCap { .. } => "daily_cap",
            Self::NeedsQr => "needs_qr",
            Self::LockedByOtherInstance => "locked_by_other_instance",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Shutdown => "shutdown",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Protocol(_) => "protocol_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Seconds after which the caller may retry, for cap rejections.
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::HourlyCap { retry_after } | Self::DailyCap { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// The `{error, message, retryAfter?}` body surfaced to API consumers.
    #[must_use]
    pub fn to_response(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let (Some(secs), Some(map)) = (self.retry_after(), body.as_object_mut()) {
            map.insert("retryAfter".into(), secs.into());
        }
        body
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
