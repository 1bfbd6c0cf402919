//! Proposal model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::task::Task;

/// Recognized metadata keys.
///
/// The metadata map stays free-form, but these are the keys the workflow
/// engine interprets.
pub mod metadata_keys {
    pub const CONTRACT_ID: &str = "contract_id";
    pub const INGESTION_ID: &str = "ingestion_id";
    pub const VISIBLE_PIXEL_HASH: &str = "visible_pixel_hash";
    pub const CREATOR: &str = "creator";
    pub const AI_IDENTIFIER: &str = "ai_identifier";
    pub const FUNDING_ADDRESS: &str = "funding_address";
    pub const EMBEDDED_MESSAGE: &str = "embedded_message";
    pub const SUGGESTED_TASKS: &str = "suggested_tasks";
    pub const IMAGE_SCAN_DATA: &str = "image_scan_data";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Published,
    Confirmed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Published => "published",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "published" => Some(Self::Published),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A competing plan by an agent to fulfill a wish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description_md: String,
    /// 64-char lower-hex SHA-256 of the wish image.
    #[serde(default)]
    pub visible_pixel_hash: String,
    pub budget_sats: u64,
    pub status: ProposalStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Structured tasks; empty means tasks are derived from the description
    /// at approval time.
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    /// Trimmed string value of a metadata key, `None` when absent, not a
    /// string, or whitespace-only.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
