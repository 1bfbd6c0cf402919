//! Submission and peer-sync models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    PendingReview,
    Reviewed,
    Accepted,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Reviewed => "reviewed",
            Self::Accepted => "accepted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_review" => Some(Self::PendingReview),
            "reviewed" => Some(Self::Reviewed),
            "accepted" => Some(Self::Accepted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Only `pending_review` submissions can be driven by a review.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::PendingReview)
    }

    /// Statuses that reopen the claim for resubmission.
    pub fn permits_resubmission(&self) -> bool {
        matches!(self, Self::Rejected | Self::Reviewed)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work artifact attached to a claim, subject to review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub submission_id: String,
    pub claim_id: String,
    pub task_id: String,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub deliverables: Map<String, Value>,
    #[serde(default)]
    pub completion_proof: Map<String, Value>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub rejection_type: Option<String>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Peer-sync record tracking proof verification per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscortStatus {
    pub task_id: String,
    pub proof_status: String,
    pub last_checked: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}
