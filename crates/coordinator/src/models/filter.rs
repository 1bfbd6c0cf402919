//! List filters for contracts and tasks.
//!
//! Filters serialize deterministically; the contract-list cache uses the
//! serialized form as its fingerprint key.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractFilter {
    /// Case-insensitive exact status match.
    #[serde(default)]
    pub status: Option<String>,
    /// Contracts must share at least one skill (intersection).
    #[serde(default)]
    pub skills: Vec<String>,
    /// Matched against `metadata.creator` of the joined proposal.
    #[serde(default)]
    pub creator: Option<String>,
    /// Matched against `metadata.ai_identifier` of the joined proposal.
    #[serde(default)]
    pub ai_identifier: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Matched against the effective task status.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub contract_id: Option<String>,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub min_budget_sats: Option<u64>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Apply offset/limit pagination to a sorted result set.
pub fn paginate<T>(items: Vec<T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let mut out: Vec<T> = items.into_iter().skip(offset).collect();
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}
