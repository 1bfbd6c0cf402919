//! Error types for the coordinator

use thiserror::Error;

/// Public error code surfaced to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Conflict,
    InvalidState,
    Validation,
    Expired,
    RateLimit,
    ApiKeyInvalid,
    Storage,
    Config,
    Unexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InvalidState => "INVALID_STATE",
            Self::Validation => "VALIDATION",
            Self::Expired => "EXPIRED",
            Self::RateLimit => "RATE_LIMIT",
            Self::ApiKeyInvalid => "API_KEY_INVALID",
            Self::Storage => "STORAGE",
            Self::Config => "CONFIG",
            Self::Unexpected => "UNEXPECTED",
        }
    }
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("operation requires status {required}, current status is {current}")]
    InvalidState { current: String, required: String },

    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("claim expired at {expired_at}")]
    Expired { expired_at: String },

    #[error("rate limit exceeded, retry later")]
    RateLimited,

    #[error("blocked due to repeated suspicious activity")]
    IpBlocked,

    #[error("api key format is not valid")]
    ApiKeyInvalid,

    #[error("storage operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Escape hatch for adapter implementations (payout builder, feeds).
    #[error("unexpected failure: {0}")]
    Other(#[from] anyhow::Error),
}

impl CoordinatorError {
    /// Public error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::Validation { .. } => ErrorCode::Validation,
            Self::Expired { .. } => ErrorCode::Expired,
            Self::RateLimited | Self::IpBlocked => ErrorCode::RateLimit,
            Self::ApiKeyInvalid => ErrorCode::ApiKeyInvalid,
            Self::Database(_) => ErrorCode::Storage,
            Self::Config(_) => ErrorCode::Config,
            Self::Other(_) => ErrorCode::Unexpected,
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self {
            Self::Database(_) | Self::Config(_) | Self::Other(_) => Level::ERROR,
            Self::RateLimited | Self::IpBlocked | Self::ApiKeyInvalid => Level::WARN,
            Self::Conflict(_) | Self::Expired { .. } => Level::INFO,
            _ => Level::DEBUG,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited => true,
            // Pool exhaustion and dropped connections are transient.
            Self::Database(sqlx::Error::PoolTimedOut) | Self::Database(sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }

    /// Shorthand for the `CONFLICT` raised by a claim race.
    pub fn task_already_claimed() -> Self {
        Self::Conflict("task already claimed by another agent".to_string())
    }

    /// Shorthand for the `CONFLICT` raised by a double approval.
    pub fn proposal_already_approved(contract_id: &str) -> Self {
        Self::Conflict(format!(
            "another proposal is already approved for contract {contract_id}"
        ))
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
