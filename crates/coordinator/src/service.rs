//! Composition root.
//!
//! The `Coordinator` owns the store, cache, rate limiter, audit log, event
//! bus and payout adapter, and fronts every public operation with the same
//! gate: api-key format check, IP block check, token spend, audit. Transport
//! (HTTP, queues) is out of scope; callers hand over an actor identity and a
//! typed payload.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::audit::{AuditLog, Severity};
use crate::cache::ContractListCache;
use crate::error::{CoordinatorError, Result};
use crate::events::{EventBus, WorkflowEvent};
use crate::identity::{is_valid_api_key, normalize_contract_id};
use crate::models::{
    Claim, Contract, ContractFilter, EscortStatus, MerkleProof, Proposal, Submission, Task,
    TaskFilter, TaskStatus,
};
use crate::psbt::PsbtBuilder;
use crate::ratelimit::RateLimiter;
use crate::store::Store;

/// Caller identity attached to every request by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct ActorIdentity {
    pub client_id: String,
    pub ip: String,
    pub api_key: Option<String>,
}

pub struct Coordinator {
    store: Arc<dyn Store>,
    cache: ContractListCache,
    limiter: RateLimiter,
    audit: AuditLog,
    events: EventBus,
    psbt: Option<Arc<dyn PsbtBuilder>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        cache: ContractListCache,
        limiter: RateLimiter,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            cache,
            limiter,
            audit,
            events: EventBus::new(),
            psbt: None,
        }
    }

    pub fn with_psbt_builder(mut self, builder: Arc<dyn PsbtBuilder>) -> Self {
        self.psbt = Some(builder);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Api-key format, IP block and token bucket, in that order.
    async fn gate(&self, actor: &ActorIdentity) -> Result<()> {
        if let Some(key) = &actor.api_key {
            if !is_valid_api_key(key) {
                self.audit.record(
                    "api_key_invalid",
                    &actor.client_id,
                    &actor.ip,
                    "malformed api key",
                    Severity::Warning,
                );
                self.limiter.mark_suspicious(&actor.ip).await;
                return Err(CoordinatorError::ApiKeyInvalid);
            }
        }
        if self.limiter.is_blocked(&actor.ip).await {
            self.audit.record(
                "ip_blocked",
                &actor.client_id,
                &actor.ip,
                "request from blocked ip",
                Severity::Critical,
            );
            return Err(CoordinatorError::IpBlocked);
        }
        if !self.limiter.allow(&actor.client_id).await {
            self.audit.record(
                "rate_limit",
                &actor.client_id,
                &actor.ip,
                "bucket empty",
                Severity::Warning,
            );
            return Err(CoordinatorError::RateLimited);
        }
        Ok(())
    }

    fn invalidate_contract(&self, contract_id: &str) {
        let canonical = normalize_contract_id(contract_id);
        self.cache.invalidate_by_contract(&canonical);
        self.cache.invalidate_by_contract(&format!("wish-{canonical}"));
    }

    // --- Reads -----------------------------------------------------------

    pub async fn list_contracts(
        &self,
        actor: &ActorIdentity,
        filter: &ContractFilter,
    ) -> Result<Vec<Contract>> {
        self.gate(actor).await?;
        let fingerprint = serde_json::to_string(filter).unwrap_or_default();
        if let Some(cached) = self.cache.get(&fingerprint) {
            return Ok(cached);
        }
        let contracts = self.store.list_contracts(filter).await?;
        self.cache.set(fingerprint, contracts.clone());
        Ok(contracts)
    }

    pub async fn get_contract(&self, actor: &ActorIdentity, id: &str) -> Result<Contract> {
        self.gate(actor).await?;
        self.store.get_contract(id).await
    }

    pub async fn get_task(&self, actor: &ActorIdentity, id: &str) -> Result<Task> {
        self.gate(actor).await?;
        self.store.get_task(id).await
    }

    pub async fn get_proposal(&self, actor: &ActorIdentity, id: &str) -> Result<Proposal> {
        self.gate(actor).await?;
        self.store.get_proposal(id).await
    }

    pub async fn list_tasks(
        &self,
        actor: &ActorIdentity,
        filter: &TaskFilter,
    ) -> Result<Vec<Task>> {
        self.gate(actor).await?;
        self.store.list_tasks(filter).await
    }

    pub async fn list_submissions(
        &self,
        actor: &ActorIdentity,
        task_ids: &[String],
    ) -> Result<Vec<Submission>> {
        self.gate(actor).await?;
        self.store.list_submissions(task_ids).await
    }

    // --- Proposal lifecycle ----------------------------------------------

    pub async fn create_proposal(
        &self,
        actor: &ActorIdentity,
        proposal: Proposal,
    ) -> Result<Proposal> {
        self.gate(actor).await?;
        let created = self.store.create_proposal(proposal).await?;
        self.invalidate_contract(&crate::identity::contract_id_for_proposal(&created));
        Ok(created)
    }

    pub async fn update_proposal(
        &self,
        actor: &ActorIdentity,
        proposal: Proposal,
    ) -> Result<Proposal> {
        self.gate(actor).await?;
        let updated = self.store.update_proposal(proposal).await?;
        self.invalidate_contract(&crate::identity::contract_id_for_proposal(&updated));
        Ok(updated)
    }

    pub async fn update_proposal_metadata(
        &self,
        actor: &ActorIdentity,
        proposal_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Proposal> {
        self.gate(actor).await?;
        let updated = self
            .store
            .update_proposal_metadata(proposal_id, updates)
            .await?;
        self.invalidate_contract(&crate::identity::contract_id_for_proposal(&updated));
        Ok(updated)
    }

    pub async fn approve_proposal(
        &self,
        actor: &ActorIdentity,
        proposal_id: &str,
    ) -> Result<Proposal> {
        self.gate(actor).await?;
        let approved = self.store.approve_proposal(proposal_id).await?;
        let canonical =
            normalize_contract_id(&crate::identity::contract_id_for_proposal(&approved));
        self.invalidate_contract(&canonical);
        self.events.publish(WorkflowEvent::ContractUpserted {
            contract_id: canonical,
        });
        Ok(approved)
    }

    pub async fn publish_proposal(
        &self,
        actor: &ActorIdentity,
        proposal_id: &str,
    ) -> Result<Proposal> {
        self.gate(actor).await?;
        let published = self.store.publish_proposal(proposal_id).await?;
        let canonical =
            normalize_contract_id(&crate::identity::contract_id_for_proposal(&published));
        self.invalidate_contract(&canonical);
        let tasks = self
            .store
            .list_tasks(&TaskFilter {
                contract_id: Some(canonical.clone()),
                ..Default::default()
            })
            .await?;
        for task in tasks {
            if task.status == TaskStatus::Published {
                self.events.publish(WorkflowEvent::TaskPublished {
                    task_id: task.task_id,
                });
            }
        }
        Ok(published)
    }

    pub async fn confirm_contract(&self, actor: &ActorIdentity, contract_id: &str) -> Result<()> {
        self.gate(actor).await?;
        self.store.confirm_contract(contract_id).await?;
        self.invalidate_contract(contract_id);
        Ok(())
    }

    // --- Task lifecycle --------------------------------------------------

    pub async fn claim_task(
        &self,
        actor: &ActorIdentity,
        task_id: &str,
        wallet: &str,
        estimated_hours: Option<f64>,
    ) -> Result<Claim> {
        self.gate(actor).await?;
        let claim = self.store.claim_task(task_id, wallet, estimated_hours).await?;
        if let Ok(task) = self.store.get_task(task_id).await {
            self.invalidate_contract(&task.contract_id);
        }
        Ok(claim)
    }

    pub async fn submit_work(
        &self,
        actor: &ActorIdentity,
        claim_id: &str,
        deliverables: Map<String, Value>,
        completion_proof: Map<String, Value>,
    ) -> Result<Submission> {
        self.gate(actor).await?;
        let submission = self
            .store
            .submit_work(claim_id, deliverables, completion_proof)
            .await?;
        if let Ok(task) = self.store.get_task(&submission.task_id).await {
            self.invalidate_contract(&task.contract_id);
        }
        Ok(submission)
    }

    pub async fn update_submission_status(
        &self,
        actor: &ActorIdentity,
        submission_id: &str,
        status: &str,
        notes: &str,
        rejection_type: &str,
    ) -> Result<Submission> {
        self.gate(actor).await?;
        let submission = self
            .store
            .update_submission_status(submission_id, status, notes, rejection_type)
            .await?;
        self.events.publish(WorkflowEvent::SubmissionReviewed {
            submission_id: submission.submission_id.clone(),
            status: submission.status.to_string(),
        });
        let contract_id = match self.store.get_task(&submission.task_id).await {
            Ok(task) => Some(task.contract_id),
            Err(_) => None,
        };
        if let Some(contract_id) = contract_id {
            self.invalidate_contract(&contract_id);
            if submission.status == crate::models::SubmissionStatus::Accepted {
                self.maybe_build_payout(&contract_id).await;
            }
        }
        Ok(submission)
    }

    pub async fn update_task_proof(
        &self,
        actor: &ActorIdentity,
        task_id: &str,
        proof: MerkleProof,
    ) -> Result<Task> {
        self.gate(actor).await?;
        let task = self.store.update_task_proof(task_id, proof).await?;
        self.invalidate_contract(&task.contract_id);
        Ok(task)
    }

    pub async fn upsert_contract_with_tasks(
        &self,
        actor: &ActorIdentity,
        contract: Contract,
        tasks: Vec<Task>,
    ) -> Result<()> {
        self.gate(actor).await?;
        let contract_id = contract.contract_id.clone();
        self.store.upsert_contract_with_tasks(contract, tasks).await?;
        self.invalidate_contract(&contract_id);
        self.events.publish(WorkflowEvent::ContractUpserted {
            contract_id: normalize_contract_id(&contract_id),
        });
        Ok(())
    }

    // --- Peer sync -------------------------------------------------------

    pub async fn sync_claim(&self, actor: &ActorIdentity, claim: Claim) -> Result<()> {
        self.gate(actor).await?;
        self.store.sync_claim(claim).await
    }

    pub async fn sync_submission(
        &self,
        actor: &ActorIdentity,
        submission: Submission,
    ) -> Result<()> {
        self.gate(actor).await?;
        self.store.sync_submission(submission).await
    }

    pub async fn sync_escort_status(
        &self,
        actor: &ActorIdentity,
        status: EscortStatus,
    ) -> Result<()> {
        self.gate(actor).await?;
        self.store.sync_escort_status(status).await
    }

    /// Build the payout once every task under the contract is approved.
    /// Failure is logged and never unwinds the review that triggered it.
    async fn maybe_build_payout(&self, contract_id: &str) {
        let Some(builder) = &self.psbt else {
            return;
        };
        let tasks = match self
            .store
            .list_tasks(&TaskFilter {
                contract_id: Some(contract_id.to_string()),
                ..Default::default()
            })
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Payout check skipped for {}: {}", contract_id, e);
                return;
            }
        };
        if tasks.is_empty() || tasks.iter().any(|t| t.status != TaskStatus::Approved) {
            return;
        }
        match builder.build_payout(contract_id).await {
            Ok(payout) => {
                info!(
                    "Payout ready for contract {}: selected {} sats, fee {} sats, change {} sats",
                    contract_id, payout.selected_sats, payout.fee_sats, payout.change_sats
                );
            }
            Err(e) => {
                error!("Payout build failed for contract {}: {}", contract_id, e);
            }
        }
    }
}
