//! Claim model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Submitted,
    Expired,
    Complete,
    Rejected,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Submitted => "submitted",
            Self::Expired => "expired",
            Self::Complete => "complete",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "submitted" | "pending_review" => Some(Self::Submitted),
            "expired" => Some(Self::Expired),
            "complete" => Some(Self::Complete),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-bounded lease a contractor holds on a task.
///
/// `ai_identifier` is the contractor's stable identity; on the hot path it
/// equals the contractor wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub task_id: String,
    pub ai_identifier: String,
    pub status: ClaimStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Claim {
    /// A claim holds the lease iff it is `active` and unexpired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == ClaimStatus::Active && now < self.expires_at
    }
}
