//! In-memory store backend.
//!
//! All mutation goes through one coarse write lock; that is the whole
//! concurrency story for this backend and what makes the concurrent-claim
//! and concurrent-approval guarantees hold. Used by tests and single-node
//! deployments without Postgres.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{CoordinatorError, Result};
use crate::identity::{contract_id_for_proposal, normalize_contract_id, validate_wallet};
use crate::models::{
    metadata_keys, Claim, ClaimStatus, Contract, ContractFilter, ContractStatus, EscortStatus,
    MerkleProof, Proposal, ProposalStatus, Submission, Task, TaskFilter, TaskStatus,
};
use crate::models::filter::paginate;
use crate::store::{Store, StoreDefaults};
use crate::validate::{validate_metadata, validate_proposal};
use crate::workflow;

#[derive(Default)]
struct Inner {
    contracts: HashMap<String, Contract>,
    proposals: HashMap<String, Proposal>,
    tasks: HashMap<String, Task>,
    claims: HashMap<String, Claim>,
    submissions: HashMap<String, Submission>,
    escort: HashMap<String, EscortStatus>,
}

impl Inner {
    /// Claims on a task, oldest first.
    fn claims_for_task(&self, task_id: &str) -> Vec<Claim> {
        let mut claims: Vec<Claim> = self
            .claims
            .values()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect();
        claims.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        claims
    }

    /// Task ids under a contract, matched under normalization.
    fn task_ids_for_contract(&self, canonical: &str) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| normalize_contract_id(&t.contract_id) == canonical)
            .map(|t| t.task_id.clone())
            .collect()
    }

    fn effective_task(&self, task: &Task, now: DateTime<Utc>) -> Task {
        let claims = self.claims_for_task(&task.task_id);
        let mut out = task.clone();
        out.status = workflow::effective_task_status(task, claims.last(), now);
        out
    }

    fn available_tasks_count(&self, canonical: &str, now: DateTime<Utc>) -> u32 {
        self.tasks
            .values()
            .filter(|t| normalize_contract_id(&t.contract_id) == canonical)
            .filter(|t| workflow::is_claimable(t, &self.claims_for_task(&t.task_id), now))
            .count() as u32
    }

    /// Proposals competing for the same contract, matched under
    /// normalization of their derived identity.
    fn sibling_proposals(&self, canonical: &str) -> Vec<String> {
        self.proposals
            .values()
            .filter(|p| normalize_contract_id(&contract_id_for_proposal(p)) == canonical)
            .map(|p| p.id.clone())
            .collect()
    }

    /// COALESCE merge for task upserts: null claim fields keep the stored
    /// lease, the contractor wallet is sticky, `created_at` survives.
    fn merge_task(existing: Option<&Task>, mut incoming: Task) -> Task {
        if let Some(existing) = existing {
            incoming.created_at = existing.created_at;
            if incoming.claimed_by.is_none() {
                incoming.claimed_by = existing.claimed_by.clone();
            }
            if incoming.claimed_at.is_none() {
                incoming.claimed_at = existing.claimed_at;
            }
            if incoming.claim_expires_at.is_none() {
                incoming.claim_expires_at = existing.claim_expires_at;
            }
            if incoming.active_claim_id.is_none() {
                incoming.active_claim_id = existing.active_claim_id.clone();
            }
            if incoming
                .contractor_wallet
                .as_deref()
                .map_or(true, str::is_empty)
            {
                incoming.contractor_wallet = existing.contractor_wallet.clone();
            }
        }
        incoming
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    defaults: StoreDefaults,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>, defaults: StoreDefaults) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            defaults,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking writer; the data is still
        // the last consistent snapshot.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Shared approve path; assumes the coarse lock is held.
    fn approve_locked(&self, inner: &mut Inner, proposal_id: &str) -> Result<Proposal> {
        let now = self.clock.now();
        let proposal = inner
            .proposals
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal_id.to_string(),
            })?;
        // Winner check first: a proposal auto-rejected by a concurrent
        // approval should surface the race as CONFLICT, not INVALID_STATE.
        let canonical = normalize_contract_id(&contract_id_for_proposal(&proposal));
        for sibling_id in inner.sibling_proposals(&canonical) {
            if sibling_id == proposal.id {
                continue;
            }
            if workflow::blocks_approval(&inner.proposals[&sibling_id]) {
                return Err(CoordinatorError::proposal_already_approved(&canonical));
            }
        }
        workflow::check_approvable(&proposal)?;

        // Task source priority: the proposal's own tasks, tasks the store
        // already holds under this contract, then markdown derivation.
        let mut tasks: Vec<Task> = proposal.tasks.clone();
        if tasks.is_empty() {
            tasks = inner
                .task_ids_for_contract(&canonical)
                .iter()
                .map(|id| inner.tasks[id].clone())
                .collect();
        }
        if tasks.is_empty() {
            tasks = crate::taskgen::derive_tasks(
                &proposal.id,
                &canonical,
                &proposal.description_md,
                proposal.budget_sats,
                now,
            );
        }
        for task in &mut tasks {
            if task.contract_id.trim().is_empty() {
                task.contract_id = canonical.clone();
            }
        }
        workflow::check_approval_tasks(&tasks)?;

        // Effects: winner approved, losers rejected, tasks approved, the
        // originating wish contract superseded.
        for task in &mut tasks {
            task.status = TaskStatus::Approved;
            task.updated_at = now;
            let merged = Inner::merge_task(inner.tasks.get(&task.task_id), task.clone());
            inner.tasks.insert(merged.task_id.clone(), merged);
        }
        for task_id in inner.task_ids_for_contract(&canonical) {
            let task = inner.tasks.get_mut(&task_id).unwrap();
            if !task.status.is_terminal() {
                task.status = TaskStatus::Approved;
                task.updated_at = now;
            }
        }
        for sibling_id in inner.sibling_proposals(&canonical) {
            if sibling_id == proposal.id {
                continue;
            }
            let sibling = inner.proposals.get_mut(&sibling_id).unwrap();
            if sibling.status == ProposalStatus::Pending {
                sibling.status = ProposalStatus::Rejected;
            }
        }
        let wish_id = format!("wish-{canonical}");
        if let Some(wish) = inner.contracts.get_mut(&wish_id) {
            wish.status = ContractStatus::Superseded;
            wish.updated_at = now;
        }

        let goals: std::collections::HashSet<&str> = tasks
            .iter()
            .map(|t| t.goal_id.as_str())
            .filter(|g| !g.is_empty())
            .collect();
        let mut skills: Vec<String> = Vec::new();
        for task in &tasks {
            for skill in &task.skills {
                if !skills.iter().any(|s| s.eq_ignore_ascii_case(skill)) {
                    skills.push(skill.clone());
                }
            }
        }
        let contract = match inner.contracts.get(&canonical) {
            Some(existing) => Contract {
                title: proposal.title.clone(),
                total_budget_sats: proposal.budget_sats,
                goals_count: goals.len().max(1) as u32,
                skills,
                updated_at: now,
                ..existing.clone()
            },
            None => Contract {
                contract_id: canonical.clone(),
                title: proposal.title.clone(),
                total_budget_sats: proposal.budget_sats,
                goals_count: goals.len().max(1) as u32,
                available_tasks_count: 0,
                status: ContractStatus::Active,
                skills,
                created_at: now,
                updated_at: now,
            },
        };
        inner.contracts.insert(canonical.clone(), contract);

        let stored = inner.proposals.get_mut(&proposal.id).unwrap();
        stored.status = ProposalStatus::Approved;
        stored.tasks = tasks;
        let approved = stored.clone();

        info!(
            "Approved proposal {} for contract {} ({} tasks)",
            approved.id,
            canonical,
            approved.tasks.len()
        );
        Ok(approved)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>> {
        let inner = self.lock();
        let now = self.clock.now();
        let mut out: Vec<Contract> = Vec::new();
        for contract in inner.contracts.values() {
            if let Some(status) = &filter.status {
                if !contract.status.as_str().eq_ignore_ascii_case(status) {
                    continue;
                }
            }
            if !filter.skills.is_empty() && !filter.skills.iter().any(|s| contract.has_skill(s)) {
                continue;
            }
            let canonical = normalize_contract_id(&contract.contract_id);
            if filter.creator.is_some() || filter.ai_identifier.is_some() {
                let matched = inner.proposals.values().any(|p| {
                    normalize_contract_id(&contract_id_for_proposal(p)) == canonical
                        && filter
                            .creator
                            .as_deref()
                            .map_or(true, |c| p.meta_str(metadata_keys::CREATOR) == Some(c))
                        && filter.ai_identifier.as_deref().map_or(true, |a| {
                            p.meta_str(metadata_keys::AI_IDENTIFIER) == Some(a)
                        })
                });
                if !matched {
                    continue;
                }
            }
            let mut contract = contract.clone();
            contract.available_tasks_count = inner.available_tasks_count(&canonical, now);
            out.push(contract);
        }
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.contract_id.cmp(&b.contract_id))
        });
        Ok(paginate(out, filter.offset, filter.limit))
    }

    async fn get_contract(&self, contract_id: &str) -> Result<Contract> {
        let inner = self.lock();
        let now = self.clock.now();
        let canonical = normalize_contract_id(contract_id);
        let found = inner
            .contracts
            .get(contract_id)
            .or_else(|| {
                inner
                    .contracts
                    .values()
                    .find(|c| normalize_contract_id(&c.contract_id) == canonical)
            })
            .cloned();
        let mut contract = found.ok_or_else(|| CoordinatorError::NotFound {
            entity: "contract",
            id: contract_id.to_string(),
        })?;
        contract.available_tasks_count =
            inner.available_tasks_count(&normalize_contract_id(&contract.contract_id), now);
        Ok(contract)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task> {
        let inner = self.lock();
        let task = inner
            .tasks
            .get(task_id)
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            })?;
        Ok(inner.effective_task(task, self.clock.now()))
    }

    async fn get_proposal(&self, proposal_id: &str) -> Result<Proposal> {
        let inner = self.lock();
        inner
            .proposals
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal_id.to_string(),
            })
    }

    async fn get_claim(&self, claim_id: &str) -> Result<Claim> {
        let inner = self.lock();
        inner
            .claims
            .get(claim_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "claim",
                id: claim_id.to_string(),
            })
    }

    async fn get_submission(&self, submission_id: &str) -> Result<Submission> {
        let inner = self.lock();
        inner
            .submissions
            .get(submission_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "submission",
                id: submission_id.to_string(),
            })
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let inner = self.lock();
        let now = self.clock.now();
        let canonical_filter = filter
            .contract_id
            .as_deref()
            .map(normalize_contract_id);
        let mut out: Vec<Task> = Vec::new();
        for task in inner.tasks.values() {
            if let Some(canonical) = &canonical_filter {
                if normalize_contract_id(&task.contract_id) != *canonical {
                    continue;
                }
            }
            let effective = inner.effective_task(task, now);
            if let Some(status) = &filter.status {
                if !effective.status.as_str().eq_ignore_ascii_case(status) {
                    continue;
                }
            }
            if let Some(claimed_by) = &filter.claimed_by {
                if effective.claimed_by.as_deref() != Some(claimed_by.as_str()) {
                    continue;
                }
            }
            if !filter.skills.is_empty()
                && !filter
                    .skills
                    .iter()
                    .any(|s| effective.skills.iter().any(|t| t.eq_ignore_ascii_case(s)))
            {
                continue;
            }
            if let Some(min) = filter.min_budget_sats {
                if effective.budget_sats < min {
                    continue;
                }
            }
            out.push(effective);
        }
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(paginate(out, filter.offset, filter.limit))
    }

    async fn list_submissions(&self, task_ids: &[String]) -> Result<Vec<Submission>> {
        let inner = self.lock();
        let mut out: Vec<Submission> = inner
            .submissions
            .values()
            .filter(|s| task_ids.iter().any(|id| *id == s.task_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn upsert_contract_with_tasks(
        &self,
        contract: Contract,
        tasks: Vec<Task>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let mut contract = contract;
        if let Some(existing) = inner.contracts.get(&contract.contract_id) {
            contract.created_at = existing.created_at;
        }
        contract.updated_at = now;
        debug!(
            "Upserting contract {} with {} tasks",
            contract.contract_id,
            tasks.len()
        );
        inner.contracts.insert(contract.contract_id.clone(), contract);
        for task in tasks {
            let merged = Inner::merge_task(inner.tasks.get(&task.task_id), task);
            inner.tasks.insert(merged.task_id.clone(), merged);
        }
        Ok(())
    }

    async fn upsert_task(&self, task: Task) -> Result<Task> {
        let mut inner = self.lock();
        let now = self.clock.now();
        if task.status == TaskStatus::Claimed {
            let claims = inner.claims_for_task(&task.task_id);
            if let Some(active) = claims.iter().find(|c| c.is_active(now)) {
                if task.claimed_by.as_deref() != Some(active.ai_identifier.as_str()) {
                    return Err(CoordinatorError::task_already_claimed());
                }
            }
        }
        let merged = Inner::merge_task(inner.tasks.get(&task.task_id), task);
        inner.tasks.insert(merged.task_id.clone(), merged.clone());
        Ok(merged)
    }

    async fn create_proposal(&self, proposal: Proposal) -> Result<Proposal> {
        let mut proposal = proposal;
        if proposal.budget_sats == 0 {
            proposal.budget_sats = self.defaults.budget_sats;
        }
        validate_proposal(&proposal)?;
        let mut inner = self.lock();
        if inner.proposals.contains_key(&proposal.id) {
            return Err(CoordinatorError::Conflict(format!(
                "proposal {} already exists",
                proposal.id
            )));
        }
        proposal.created_at = self.clock.now();
        info!("Created proposal {}", proposal.id);
        inner
            .proposals
            .insert(proposal.id.clone(), proposal.clone());
        Ok(proposal)
    }

    async fn update_proposal(&self, proposal: Proposal) -> Result<Proposal> {
        validate_proposal(&proposal)?;
        let mut inner = self.lock();
        let existing = inner
            .proposals
            .get(&proposal.id)
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal.id.clone(),
            })?;
        if existing.status != ProposalStatus::Pending {
            return Err(CoordinatorError::InvalidState {
                current: existing.status.to_string(),
                required: "pending".to_string(),
            });
        }
        let mut updated = proposal;
        updated.created_at = existing.created_at;
        inner.proposals.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn update_proposal_metadata(
        &self,
        proposal_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Proposal> {
        let mut inner = self.lock();
        let proposal = inner
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal_id.to_string(),
            })?;
        let mut merged = proposal.metadata.clone();
        for (key, value) in updates {
            merged.insert(key, value);
        }
        validate_metadata(&merged)?;
        proposal.metadata = merged;
        Ok(proposal.clone())
    }

    async fn approve_proposal(&self, proposal_id: &str) -> Result<Proposal> {
        let mut inner = self.lock();
        self.approve_locked(&mut inner, proposal_id)
    }

    async fn publish_proposal(&self, proposal_id: &str) -> Result<Proposal> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let proposal = inner
            .proposals
            .get(proposal_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal_id.to_string(),
            })?;
        match proposal.status {
            ProposalStatus::Approved | ProposalStatus::Published => {}
            other => {
                return Err(CoordinatorError::InvalidState {
                    current: other.to_string(),
                    required: "approved".to_string(),
                })
            }
        }
        let canonical = normalize_contract_id(&contract_id_for_proposal(&proposal));
        for task_id in inner.task_ids_for_contract(&canonical) {
            let claims = inner.claims_for_task(&task_id);
            let task = inner.tasks.get_mut(&task_id).unwrap();
            if workflow::publishable_task(task.status) {
                task.status = TaskStatus::Published;
                task.updated_at = now;
            }
            for claim in claims {
                if workflow::publishable_claim(claim.status) {
                    inner.claims.get_mut(&claim.claim_id).unwrap().status =
                        ClaimStatus::Complete;
                }
            }
        }
        let stored = inner.proposals.get_mut(proposal_id).unwrap();
        stored.status = ProposalStatus::Published;
        info!("Published proposal {} (contract {})", proposal_id, canonical);
        Ok(stored.clone())
    }

    async fn confirm_contract(&self, contract_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let canonical = normalize_contract_id(contract_id);
        let mut touched = false;
        for contract in inner.contracts.values_mut() {
            if normalize_contract_id(&contract.contract_id) == canonical {
                contract.status = ContractStatus::Confirmed;
                contract.updated_at = now;
                touched = true;
            }
        }
        if !touched {
            return Err(CoordinatorError::NotFound {
                entity: "contract",
                id: contract_id.to_string(),
            });
        }
        for proposal in inner.proposals.values_mut() {
            let matches =
                normalize_contract_id(&contract_id_for_proposal(proposal)) == canonical;
            if matches
                && matches!(
                    proposal.status,
                    ProposalStatus::Approved | ProposalStatus::Published
                )
            {
                proposal.status = ProposalStatus::Confirmed;
            }
        }
        info!("Contract {} confirmed on-chain", canonical);
        Ok(())
    }

    async fn claim_task(
        &self,
        task_id: &str,
        wallet: &str,
        estimated_hours: Option<f64>,
    ) -> Result<Claim> {
        validate_wallet(wallet)?;
        let mut inner = self.lock();
        let now = self.clock.now();
        let task = inner
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            })?;
        let claims = inner.claims_for_task(task_id);
        match workflow::resolve_claim(&task, &claims, wallet, now)? {
            workflow::ClaimDecision::Existing(claim) => {
                let task = inner.tasks.get_mut(task_id).unwrap();
                task.inherit_wallet(wallet);
                debug!("Reclaim of task {} by existing lease holder", task_id);
                Ok(claim)
            }
            workflow::ClaimDecision::New => {
                let claim = workflow::new_claim(
                    task_id,
                    wallet,
                    self.defaults.claim_ttl,
                    self.clock.as_ref(),
                );
                let task = inner.tasks.get_mut(task_id).unwrap();
                workflow::apply_claim(task, &claim);
                if estimated_hours.is_some() {
                    task.estimated_hours = estimated_hours;
                }
                inner.claims.insert(claim.claim_id.clone(), claim.clone());
                info!("Task {} claimed ({})", task_id, claim.claim_id);
                Ok(claim)
            }
        }
    }

    async fn submit_work(
        &self,
        claim_id: &str,
        deliverables: Map<String, Value>,
        completion_proof: Map<String, Value>,
    ) -> Result<Submission> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let claim = inner
            .claims
            .get(claim_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "claim",
                id: claim_id.to_string(),
            })?;
        let mut priors: Vec<Submission> = inner
            .submissions
            .values()
            .filter(|s| s.claim_id == claim_id)
            .cloned()
            .collect();
        priors.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        match workflow::check_submit(&claim, &priors, now)? {
            workflow::SubmitDecision::Expired => {
                inner.claims.get_mut(claim_id).unwrap().status = ClaimStatus::Expired;
                return Err(CoordinatorError::Expired {
                    expired_at: claim.expires_at.to_rfc3339(),
                });
            }
            workflow::SubmitDecision::Reactivate => {
                inner.claims.get_mut(claim_id).unwrap().status = ClaimStatus::Active;
            }
            workflow::SubmitDecision::Proceed => {}
        }
        let submission =
            workflow::new_submission(&claim, deliverables, completion_proof, self.clock.as_ref());
        if let Some(task) = inner.tasks.get_mut(&claim.task_id) {
            task.status = TaskStatus::Submitted;
            task.updated_at = now;
        }
        inner.claims.get_mut(claim_id).unwrap().status = ClaimStatus::Submitted;
        inner
            .submissions
            .insert(submission.submission_id.clone(), submission.clone());
        info!(
            "Submission {} recorded for claim {}",
            submission.submission_id, claim_id
        );
        Ok(submission)
    }

    async fn update_submission_status(
        &self,
        submission_id: &str,
        status: &str,
        notes: &str,
        rejection_type: &str,
    ) -> Result<Submission> {
        let action = workflow::ReviewAction::parse(status)?;
        let mut inner = self.lock();
        let now = self.clock.now();
        let submission = inner
            .submissions
            .get(submission_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "submission",
                id: submission_id.to_string(),
            })?;
        workflow::check_reviewable(&submission)?;

        let updated = match action {
            workflow::ReviewAction::Accept => {
                if let Some(claim) = inner.claims.get_mut(&submission.claim_id) {
                    claim.status = ClaimStatus::Complete;
                }
                if let Some(task) = inner.tasks.get_mut(&submission.task_id) {
                    task.status = TaskStatus::Approved;
                    task.updated_at = now;
                }
                let stored = inner.submissions.get_mut(submission_id).unwrap();
                stored.status = crate::models::SubmissionStatus::Accepted;
                stored.clone()
            }
            workflow::ReviewAction::Reject => {
                if let Some(claim) = inner.claims.get_mut(&submission.claim_id) {
                    claim.status = ClaimStatus::Rejected;
                }
                if let Some(task) = inner.tasks.get_mut(&submission.task_id) {
                    task.status = TaskStatus::Available;
                    task.release_lease();
                    task.updated_at = now;
                }
                let stored = inner.submissions.get_mut(submission_id).unwrap();
                stored.status = crate::models::SubmissionStatus::Rejected;
                stored.rejection_reason = (!notes.is_empty()).then(|| notes.to_string());
                stored.rejection_type =
                    (!rejection_type.is_empty()).then(|| rejection_type.to_string());
                stored.rejected_at = Some(now);
                stored.clone()
            }
            workflow::ReviewAction::Review => {
                let stored = inner.submissions.get_mut(submission_id).unwrap();
                stored.status = crate::models::SubmissionStatus::Reviewed;
                stored.clone()
            }
        };
        info!(
            "Submission {} reviewed as {}",
            submission_id, updated.status
        );
        Ok(updated)
    }

    async fn update_task_proof(&self, task_id: &str, proof: MerkleProof) -> Result<Task> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let snapshot = {
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| CoordinatorError::NotFound {
                    entity: "task",
                    id: task_id.to_string(),
                })?;
            let mut proof = proof;
            if proof.contractor_wallet.is_empty() {
                if let Some(existing) = &task.merkle_proof {
                    proof.contractor_wallet = existing.contractor_wallet.clone();
                }
                if proof.contractor_wallet.is_empty() {
                    if let Some(wallet) = &task.contractor_wallet {
                        proof.contractor_wallet = wallet.clone();
                    }
                }
            }
            if !proof.contractor_wallet.is_empty()
                && task
                    .contractor_wallet
                    .as_deref()
                    .map_or(true, str::is_empty)
            {
                task.contractor_wallet = Some(proof.contractor_wallet.clone());
            }
            task.merkle_proof = Some(proof);
            task.updated_at = now;
            task.clone()
        };
        Ok(inner.effective_task(&snapshot, now))
    }

    async fn sync_claim(&self, claim: Claim) -> Result<()> {
        let mut inner = self.lock();
        let now = self.clock.now();
        let local = inner.claims_for_task(&claim.task_id);
        if let Some(active) = local.iter().find(|c| c.is_active(now)) {
            if active.ai_identifier != claim.ai_identifier {
                return Err(CoordinatorError::task_already_claimed());
            }
        }
        if claim.is_active(now) {
            if let Some(task) = inner.tasks.get_mut(&claim.task_id) {
                workflow::apply_claim(task, &claim);
            }
        }
        inner.claims.insert(claim.claim_id.clone(), claim);
        Ok(())
    }

    async fn sync_submission(&self, submission: Submission) -> Result<()> {
        let mut inner = self.lock();
        inner
            .submissions
            .insert(submission.submission_id.clone(), submission);
        Ok(())
    }

    async fn sync_escort_status(&self, status: EscortStatus) -> Result<()> {
        let mut inner = self.lock();
        inner.escort.insert(status.task_id.clone(), status);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
