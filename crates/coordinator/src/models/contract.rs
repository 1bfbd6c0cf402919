//! Contract model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a contract.
///
/// `active` contracts accept proposals and task work; a wish contract whose
/// proposal won becomes `superseded`; `confirmed` means the funding
/// transaction confirmed on-chain; `closed` contracts are finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Superseded,
    Confirmed,
    Closed,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Confirmed => "confirmed",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "superseded" => Some(Self::Superseded),
            "confirmed" => Some(Self::Confirmed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-chain-anchored agreement resulting from approving exactly one proposal.
///
/// `contract_id` is the canonical identifier: the visible pixel hash of the
/// wish image, normalized (no `wish-`/`proposal-`/`task-` prefix).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: String,
    pub title: String,
    pub total_budget_sats: u64,
    pub goals_count: u32,
    /// Derived on read: tasks currently open for claiming.
    #[serde(default)]
    pub available_tasks_count: u32,
    pub status: ContractStatus,
    /// Case-insensitive skill tags.
    #[serde(default)]
    pub skills: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    /// True when the contract advertises `skill` (case-insensitive).
    pub fn has_skill(&self, skill: &str) -> bool {
        self.skills.iter().any(|s| s.eq_ignore_ascii_case(skill))
    }
}
