//! Transactional repository for the marketplace entities.
//!
//! Two interchangeable backends share one contract: [`memory::MemoryStore`]
//! guards everything with a single coarse write lock, [`postgres::PgStore`]
//! takes per-row `FOR UPDATE` locks inside transactions. All transition
//! decisions are delegated to [`crate::workflow`] so the state machine is
//! implemented once.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{
    Claim, Contract, ContractFilter, EscortStatus, MerkleProof, Proposal, Submission, Task,
    TaskFilter,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store-level defaults injected from configuration.
#[derive(Debug, Clone)]
pub struct StoreDefaults {
    /// Applied when a proposal arrives with a zero budget.
    pub budget_sats: u64,
    /// Claim lease length.
    pub claim_ttl: chrono::Duration,
}

impl Default for StoreDefaults {
    fn default() -> Self {
        Self {
            budget_sats: 100_000,
            claim_ttl: chrono::Duration::hours(1),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- Reads -----------------------------------------------------------

    /// Contracts matching the filter, with derived `available_tasks_count`.
    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>>;

    async fn get_contract(&self, contract_id: &str) -> Result<Contract>;

    /// Task with its effective status recomputed from the freshest claim.
    async fn get_task(&self, task_id: &str) -> Result<Task>;

    async fn get_proposal(&self, proposal_id: &str) -> Result<Proposal>;

    async fn get_claim(&self, claim_id: &str) -> Result<Claim>;

    async fn get_submission(&self, submission_id: &str) -> Result<Submission>;

    /// Tasks matching the filter, effective statuses recomputed.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Submissions belonging to any of the given tasks, ordered by
    /// `created_at`.
    async fn list_submissions(&self, task_ids: &[String]) -> Result<Vec<Submission>>;

    // --- Writes ----------------------------------------------------------

    /// Atomic contract + task batch. Incoming null claim fields preserve the
    /// stored lease (COALESCE semantics); the contractor wallet is sticky.
    async fn upsert_contract_with_tasks(&self, contract: Contract, tasks: Vec<Task>)
        -> Result<()>;

    /// Single-task upsert. Refuses to move `claimed_by` to a different
    /// identity while another agent holds a live lease.
    async fn upsert_task(&self, task: Task) -> Result<Task>;

    async fn create_proposal(&self, proposal: Proposal) -> Result<Proposal>;

    /// Full update, allowed only while the proposal is `pending`.
    async fn update_proposal(&self, proposal: Proposal) -> Result<Proposal>;

    /// Free-form metadata merge; no status gate.
    async fn update_proposal_metadata(
        &self,
        proposal_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Proposal>;

    // --- Workflow transitions (executed atomically) ----------------------

    async fn approve_proposal(&self, proposal_id: &str) -> Result<Proposal>;

    async fn publish_proposal(&self, proposal_id: &str) -> Result<Proposal>;

    /// On-chain confirmation feed: contract → `confirmed`, winning proposals
    /// in its identity-equivalence set → `confirmed`.
    async fn confirm_contract(&self, contract_id: &str) -> Result<()>;

    async fn claim_task(
        &self,
        task_id: &str,
        wallet: &str,
        estimated_hours: Option<f64>,
    ) -> Result<Claim>;

    async fn submit_work(
        &self,
        claim_id: &str,
        deliverables: Map<String, Value>,
        completion_proof: Map<String, Value>,
    ) -> Result<Submission>;

    async fn update_submission_status(
        &self,
        submission_id: &str,
        status: &str,
        notes: &str,
        rejection_type: &str,
    ) -> Result<Submission>;

    /// Merge a merkle proof into the task; the recorded wallet is sticky.
    async fn update_task_proof(&self, task_id: &str, proof: MerkleProof) -> Result<Task>;

    // --- Peer sync -------------------------------------------------------

    /// Apply a claim published by another instance. Conflicting `claimed_by`
    /// against a live local lease is rejected.
    async fn sync_claim(&self, claim: Claim) -> Result<()>;

    async fn sync_submission(&self, submission: Submission) -> Result<()>;

    async fn sync_escort_status(&self, status: EscortStatus) -> Result<()>;

    /// Release backend resources.
    async fn close(&self) -> Result<()>;
}
