//! Error types for the mirror

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IPFS API error: {endpoint}, status: {status}, message: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("HTTP request failed: {url}, status: {status:?}, error: {error}")]
    HttpRequest {
        url: String,
        status: Option<u16>,
        error: String,
    },

    #[error("Network timeout after {timeout_secs}s: {context}")]
    NetworkTimeout { timeout_secs: u64, context: String },

    #[error("Network connection error: {0}")]
    NetworkConnection(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {context}, error: {error}")]
    JsonParse { context: String, error: String },

    #[error("Payload decoding failed: {0}")]
    Decode(String),

    #[error("Unsafe manifest path rejected: {path}")]
    UnsafePath { path: String },

    #[error("Pubsub stream ended: {0}")]
    StreamEnded(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MirrorError {
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self {
            Self::Config(_) => Level::ERROR,
            Self::UnsafePath { .. } => Level::WARN,
            Self::Api { .. } | Self::HttpRequest { .. } => Level::WARN,
            Self::NetworkTimeout { .. } | Self::NetworkConnection(_) => Level::WARN,
            Self::StreamEnded(_) => Level::WARN,
            Self::JsonParse { .. } | Self::Decode(_) => Level::WARN,
            Self::Io(_) => Level::ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTimeout { .. }
            | Self::NetworkConnection(_)
            | Self::HttpRequest { .. }
            | Self::StreamEnded(_) => true,
            // 5xx from the daemon is transient; 4xx is a caller bug.
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        let status = err.status().map(|s| s.as_u16());

        if err.is_timeout() {
            Self::NetworkTimeout {
                timeout_secs: 30,
                context: url,
            }
        } else if err.is_connect() {
            Self::NetworkConnection(format!("Failed to connect to {}: {}", url, err))
        } else {
            Self::HttpRequest {
                url,
                status,
                error: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonParse {
            context: "JSON deserialization".to_string(),
            error: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
