//! Task model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stored task status.
///
/// `approved` is overloaded by the source system: proposal approval marks
/// every task under the contract `approved`, and a review accept marks the
/// finished task `approved`. The two are told apart through claims: a task
/// with a `complete` claim is done, one without is open for leasing. Reads
/// recompute the effective status from the freshest claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Available,
    Claimed,
    Submitted,
    Approved,
    Published,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Claimed => "claimed",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Published => "published",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(Self::Available),
            "claimed" => Some(Self::Claimed),
            "submitted" | "pending_review" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "published" => Some(Self::Published),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// `published` and `completed` tasks never move again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Completed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Provisional,
    Confirmed,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisional => "provisional",
            Self::Confirmed => "confirmed",
        }
    }
}

/// Opaque record tying a task to its funding transaction and contractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    #[serde(default)]
    pub visible_pixel_hash: String,
    #[serde(default)]
    pub funded_amount_sats: u64,
    #[serde(default)]
    pub funding_address: String,
    #[serde(default)]
    pub contractor_wallet: String,
    pub confirmation_status: ConfirmationStatus,
}

/// Atomic unit of work with its own budget, claimable once at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub contract_id: String,
    #[serde(default)]
    pub goal_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub budget_sats: u64,
    #[serde(default)]
    pub skills: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claim_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active_claim_id: Option<String>,
    /// Sticky: once recorded, never erased by later updates.
    #[serde(default)]
    pub contractor_wallet: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub requirements: Map<String, Value>,
    #[serde(default)]
    pub merkle_proof: Option<MerkleProof>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Clear the lease fields after a rejection releases the task.
    ///
    /// `contractor_wallet` is intentionally left alone (wallet stickiness).
    pub fn release_lease(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
        self.claim_expires_at = None;
        self.active_claim_id = None;
    }

    /// Record the wallet on the task and its proof unless already set.
    pub fn inherit_wallet(&mut self, wallet: &str) {
        if wallet.is_empty() {
            return;
        }
        if self
            .contractor_wallet
            .as_deref()
            .map_or(true, str::is_empty)
        {
            self.contractor_wallet = Some(wallet.to_string());
        }
        if let Some(proof) = &mut self.merkle_proof {
            if proof.contractor_wallet.is_empty() {
                proof.contractor_wallet = wallet.to_string();
            }
        }
    }
}
