//! Pure state-machine logic shared by both store backends.
//!
//! The backends own locking and persistence; every transition decision lives
//! here so the proposal/task/claim/submission machines exist exactly once.
//! Functions take snapshots of the rows a backend already locked and return
//! decisions for it to apply.

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::{CoordinatorError, Result};
use crate::models::{
    Claim, ClaimStatus, Proposal, ProposalStatus, Submission, SubmissionStatus, Task, TaskStatus,
};

/// Outcome of resolving a claim attempt against the task's claim history.
#[derive(Debug)]
pub enum ClaimDecision {
    /// Idempotent reclaim: the wallet already holds the active lease.
    Existing(Claim),
    /// No live lease; the caller should create a fresh claim.
    New,
}

/// Resolve a claim attempt. The caller must hold the task row.
///
/// A task whose stored status is `approved` (contract approved) stays
/// claimable until some claim completes; a `complete` claim marks the task
/// done for good.
pub fn resolve_claim(
    task: &Task,
    claims: &[Claim],
    wallet: &str,
    now: DateTime<Utc>,
) -> Result<ClaimDecision> {
    if task.status.is_terminal() {
        return Err(CoordinatorError::InvalidState {
            current: task.status.to_string(),
            required: "available".to_string(),
        });
    }
    if task.status == TaskStatus::Submitted {
        return Err(CoordinatorError::InvalidState {
            current: task.status.to_string(),
            required: "available".to_string(),
        });
    }
    if let Some(active) = claims.iter().find(|c| c.is_active(now)) {
        if active.ai_identifier == wallet {
            return Ok(ClaimDecision::Existing(active.clone()));
        }
        return Err(CoordinatorError::task_already_claimed());
    }
    if claims.iter().any(|c| c.status == ClaimStatus::Complete) {
        return Err(CoordinatorError::InvalidState {
            current: "approved".to_string(),
            required: "available".to_string(),
        });
    }
    Ok(ClaimDecision::New)
}

/// True when a fresh claim could be created on the task right now.
pub fn is_claimable(task: &Task, claims: &[Claim], now: DateTime<Utc>) -> bool {
    matches!(resolve_claim(task, claims, "", now), Ok(ClaimDecision::New))
}

/// Build the claim record for a fresh lease.
pub fn new_claim(
    task_id: &str,
    wallet: &str,
    claim_ttl: chrono::Duration,
    clock: &dyn Clock,
) -> Claim {
    let now = clock.now();
    Claim {
        claim_id: format!("CLAIM-{}", clock.monotonic_ns()),
        task_id: task_id.to_string(),
        ai_identifier: wallet.to_string(),
        status: ClaimStatus::Active,
        expires_at: now + claim_ttl,
        created_at: now,
    }
}

/// Apply a fresh lease to the task row.
pub fn apply_claim(task: &mut Task, claim: &Claim) {
    task.status = TaskStatus::Claimed;
    task.claimed_by = Some(claim.ai_identifier.clone());
    task.claimed_at = Some(claim.created_at);
    task.claim_expires_at = Some(claim.expires_at);
    task.active_claim_id = Some(claim.claim_id.clone());
    task.inherit_wallet(&claim.ai_identifier);
    task.updated_at = claim.created_at;
}

/// Outcome of the submission gate.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitDecision {
    /// Claim is live; write the submission.
    Proceed,
    /// Claim already submitted once but a prior submission was rejected or
    /// reviewed; reactivate the claim, then write the submission.
    Reactivate,
    /// Lease lapsed; mark the claim expired and fail `EXPIRED`.
    Expired,
}

/// Two-phase submission gate: status check, lease check, resubmission check.
pub fn check_submit(
    claim: &Claim,
    prior_submissions: &[Submission],
    now: DateTime<Utc>,
) -> Result<SubmitDecision> {
    if !matches!(claim.status, ClaimStatus::Active | ClaimStatus::Submitted) {
        return Err(CoordinatorError::InvalidState {
            current: claim.status.to_string(),
            required: "active".to_string(),
        });
    }
    if now > claim.expires_at {
        return Ok(SubmitDecision::Expired);
    }
    if claim.status == ClaimStatus::Submitted {
        if prior_submissions
            .iter()
            .any(|s| s.status.permits_resubmission())
        {
            return Ok(SubmitDecision::Reactivate);
        }
        return Err(CoordinatorError::InvalidState {
            current: "submitted".to_string(),
            required: "rejected or reviewed prior submission".to_string(),
        });
    }
    Ok(SubmitDecision::Proceed)
}

/// Build the submission record.
pub fn new_submission(
    claim: &Claim,
    deliverables: serde_json::Map<String, serde_json::Value>,
    completion_proof: serde_json::Map<String, serde_json::Value>,
    clock: &dyn Clock,
) -> Submission {
    Submission {
        submission_id: format!("SUB-{}", clock.monotonic_ns()),
        claim_id: claim.claim_id.clone(),
        task_id: claim.task_id.clone(),
        status: SubmissionStatus::PendingReview,
        deliverables,
        completion_proof,
        rejection_reason: None,
        rejection_type: None,
        rejected_at: None,
        created_at: clock.now(),
    }
}

/// Review verdicts accepted by `update_submission_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Accept,
    Reject,
    Review,
}

impl ReviewAction {
    /// `accept` and `approve` are synonyms in review payloads.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "accept" | "accepted" | "approve" | "approved" => Ok(Self::Accept),
            "reject" | "rejected" => Ok(Self::Reject),
            "review" | "reviewed" => Ok(Self::Review),
            _ => Err(CoordinatorError::Validation {
                field: "status".to_string(),
                reason: "not a recognized review action".to_string(),
            }),
        }
    }
}

/// Guard: only `pending_review` submissions can be reviewed.
pub fn check_reviewable(submission: &Submission) -> Result<()> {
    if !submission.status.is_reviewable() {
        return Err(CoordinatorError::InvalidState {
            current: submission.status.to_string(),
            required: "pending_review".to_string(),
        });
    }
    Ok(())
}

/// Preconditions for approving a proposal (beyond the winner check, which
/// requires scanning sibling proposals under the same lock).
pub fn check_approvable(proposal: &Proposal) -> Result<()> {
    if proposal.status != ProposalStatus::Pending {
        return Err(CoordinatorError::InvalidState {
            current: proposal.status.to_string(),
            required: "pending".to_string(),
        });
    }
    Ok(())
}

/// Budgeted-approval invariant: at least one task, all budgets positive.
pub fn check_approval_tasks(tasks: &[Task]) -> Result<()> {
    if tasks.is_empty() {
        return Err(CoordinatorError::Validation {
            field: "tasks".to_string(),
            reason: "approval requires at least one task".to_string(),
        });
    }
    if let Some(bad) = tasks.iter().find(|t| t.budget_sats == 0) {
        return Err(CoordinatorError::Validation {
            field: format!("tasks.{}.budget_sats", bad.task_id),
            reason: "approved tasks require a positive budget".to_string(),
        });
    }
    Ok(())
}

/// Another proposal already holds or held the contract.
pub fn blocks_approval(other: &Proposal) -> bool {
    matches!(
        other.status,
        ProposalStatus::Approved | ProposalStatus::Published
    )
}

/// Task statuses swept to `published` when the proposal publishes.
pub fn publishable_task(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Submitted | TaskStatus::Claimed | TaskStatus::Approved
    )
}

/// Claim statuses finalized to `complete` when the proposal publishes.
pub fn publishable_claim(status: ClaimStatus) -> bool {
    matches!(status, ClaimStatus::Active | ClaimStatus::Submitted)
}

/// Effective task status joined with the freshest claim.
///
/// Reads never trust the stored status alone: proposal approval stomps task
/// rows to `approved`, and leases expire without anyone writing the task.
pub fn effective_task_status(
    task: &Task,
    latest_claim: Option<&Claim>,
    now: DateTime<Utc>,
) -> TaskStatus {
    if task.status.is_terminal() {
        return task.status;
    }
    if let Some(claim) = latest_claim {
        match claim.status {
            ClaimStatus::Submitted => return TaskStatus::Submitted,
            ClaimStatus::Complete => return TaskStatus::Approved,
            ClaimStatus::Active => {
                if claim.is_active(now)
                    && matches!(task.status, TaskStatus::Available | TaskStatus::Approved | TaskStatus::Claimed)
                {
                    return TaskStatus::Claimed;
                }
                if !claim.is_active(now) && task.status == TaskStatus::Claimed {
                    return TaskStatus::Available;
                }
            }
            _ => {}
        }
    }
    if task.status == TaskStatus::Claimed
        && task
            .claim_expires_at
            .map_or(false, |expires| now >= expires)
    {
        return TaskStatus::Available;
    }
    task.status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use serde_json::Map;

    const WALLET: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
    const OTHER_WALLET: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

    fn task(status: TaskStatus) -> Task {
        Task {
            task_id: "t1".to_string(),
            contract_id: "c1".to_string(),
            goal_id: String::new(),
            title: "T".to_string(),
            description: String::new(),
            budget_sats: 1000,
            skills: vec![],
            status,
            claimed_by: None,
            claimed_at: None,
            claim_expires_at: None,
            active_claim_id: None,
            contractor_wallet: None,
            difficulty: None,
            estimated_hours: None,
            requirements: Map::new(),
            merkle_proof: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn claim(status: ClaimStatus, wallet: &str, expires_in_secs: i64) -> Claim {
        let now = Utc::now();
        Claim {
            claim_id: "CLAIM-1".to_string(),
            task_id: "t1".to_string(),
            ai_identifier: wallet.to_string(),
            status,
            expires_at: now + Duration::seconds(expires_in_secs),
            created_at: now,
        }
    }

    // -----------------------------------------------------------------------
    // Claim resolution
    // -----------------------------------------------------------------------

    #[test]
    fn test_fresh_task_yields_new_claim() {
        let decision = resolve_claim(&task(TaskStatus::Available), &[], WALLET, Utc::now());
        assert!(matches!(decision, Ok(ClaimDecision::New)));
    }

    #[test]
    fn test_contract_approved_task_is_claimable() {
        let decision = resolve_claim(&task(TaskStatus::Approved), &[], WALLET, Utc::now());
        assert!(matches!(decision, Ok(ClaimDecision::New)));
    }

    #[test]
    fn test_idempotent_reclaim_same_wallet() {
        let claims = vec![claim(ClaimStatus::Active, WALLET, 60)];
        let decision = resolve_claim(&task(TaskStatus::Claimed), &claims, WALLET, Utc::now());
        match decision {
            Ok(ClaimDecision::Existing(c)) => assert_eq!(c.claim_id, "CLAIM-1"),
            other => panic!("expected Existing, got {other:?}"),
        }
    }

    #[test]
    fn test_other_wallet_active_claim_conflicts() {
        let claims = vec![claim(ClaimStatus::Active, OTHER_WALLET, 60)];
        let err = resolve_claim(&task(TaskStatus::Claimed), &claims, WALLET, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Conflict(_)));
    }

    #[test]
    fn test_expired_lease_allows_new_claim() {
        let claims = vec![claim(ClaimStatus::Expired, OTHER_WALLET, -10)];
        let decision =
            resolve_claim(&task(TaskStatus::Claimed), &claims, WALLET, Utc::now());
        assert!(matches!(decision, Ok(ClaimDecision::New)));
    }

    #[test]
    fn test_completed_claim_blocks_reclaim() {
        // Review-approved work is terminal even though the stored task
        // status is the overloaded "approved".
        let claims = vec![claim(ClaimStatus::Complete, OTHER_WALLET, 60)];
        let err = resolve_claim(&task(TaskStatus::Approved), &claims, WALLET, Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));
    }

    #[test]
    fn test_terminal_statuses_not_claimable() {
        for status in [TaskStatus::Published, TaskStatus::Completed, TaskStatus::Submitted] {
            let err = resolve_claim(&task(status), &[], WALLET, Utc::now()).unwrap_err();
            assert!(matches!(err, CoordinatorError::InvalidState { .. }));
        }
    }

    // -----------------------------------------------------------------------
    // Submission gate
    // -----------------------------------------------------------------------

    fn submission(status: SubmissionStatus) -> Submission {
        Submission {
            submission_id: "SUB-1".to_string(),
            claim_id: "CLAIM-1".to_string(),
            task_id: "t1".to_string(),
            status,
            deliverables: Map::new(),
            completion_proof: Map::new(),
            rejection_reason: None,
            rejection_type: None,
            rejected_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_active_claim_proceeds() {
        let c = claim(ClaimStatus::Active, WALLET, 60);
        assert_eq!(check_submit(&c, &[], Utc::now()).unwrap(), SubmitDecision::Proceed);
    }

    #[test]
    fn test_lapsed_lease_expires() {
        let c = claim(ClaimStatus::Active, WALLET, -5);
        assert_eq!(check_submit(&c, &[], Utc::now()).unwrap(), SubmitDecision::Expired);
    }

    #[test]
    fn test_resubmission_requires_rejected_or_reviewed() {
        let c = claim(ClaimStatus::Submitted, WALLET, 60);

        let err = check_submit(&c, &[submission(SubmissionStatus::PendingReview)], Utc::now())
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState { .. }));

        let decision =
            check_submit(&c, &[submission(SubmissionStatus::Rejected)], Utc::now()).unwrap();
        assert_eq!(decision, SubmitDecision::Reactivate);

        let decision =
            check_submit(&c, &[submission(SubmissionStatus::Reviewed)], Utc::now()).unwrap();
        assert_eq!(decision, SubmitDecision::Reactivate);
    }

    #[test]
    fn test_finalized_claims_cannot_submit() {
        for status in [ClaimStatus::Expired, ClaimStatus::Complete, ClaimStatus::Rejected] {
            let c = claim(status, WALLET, 60);
            assert!(check_submit(&c, &[], Utc::now()).is_err());
        }
    }

    // -----------------------------------------------------------------------
    // Review actions
    // -----------------------------------------------------------------------

    #[test]
    fn test_review_action_aliases() {
        assert_eq!(ReviewAction::parse("accept").unwrap(), ReviewAction::Accept);
        assert_eq!(ReviewAction::parse("approve").unwrap(), ReviewAction::Accept);
        assert_eq!(ReviewAction::parse("accepted").unwrap(), ReviewAction::Accept);
        assert_eq!(ReviewAction::parse("reject").unwrap(), ReviewAction::Reject);
        assert_eq!(ReviewAction::parse("review").unwrap(), ReviewAction::Review);
        assert!(ReviewAction::parse("shrug").is_err());
    }

    #[test]
    fn test_finalized_submission_not_re_reviewable() {
        for status in [
            SubmissionStatus::Accepted,
            SubmissionStatus::Approved,
            SubmissionStatus::Rejected,
            SubmissionStatus::Reviewed,
        ] {
            assert!(check_reviewable(&submission(status)).is_err());
        }
        assert!(check_reviewable(&submission(SubmissionStatus::PendingReview)).is_ok());
    }

    // -----------------------------------------------------------------------
    // Effective status
    // -----------------------------------------------------------------------

    #[test]
    fn test_effective_status_submitted_claim() {
        let c = claim(ClaimStatus::Submitted, WALLET, 60);
        assert_eq!(
            effective_task_status(&task(TaskStatus::Approved), Some(&c), Utc::now()),
            TaskStatus::Submitted
        );
    }

    #[test]
    fn test_effective_status_active_claim_over_approved_task() {
        let c = claim(ClaimStatus::Active, WALLET, 60);
        assert_eq!(
            effective_task_status(&task(TaskStatus::Approved), Some(&c), Utc::now()),
            TaskStatus::Claimed
        );
    }

    #[test]
    fn test_effective_status_complete_claim() {
        let c = claim(ClaimStatus::Complete, WALLET, 60);
        assert_eq!(
            effective_task_status(&task(TaskStatus::Approved), Some(&c), Utc::now()),
            TaskStatus::Approved
        );
    }

    #[test]
    fn test_effective_status_expired_lease_reads_available() {
        let c = claim(ClaimStatus::Active, WALLET, -5);
        let mut t = task(TaskStatus::Claimed);
        t.claim_expires_at = Some(Utc::now() - Duration::seconds(5));
        assert_eq!(
            effective_task_status(&t, Some(&c), Utc::now()),
            TaskStatus::Available
        );
    }

    #[test]
    fn test_effective_status_terminal_wins() {
        let c = claim(ClaimStatus::Active, WALLET, 60);
        assert_eq!(
            effective_task_status(&task(TaskStatus::Published), Some(&c), Utc::now()),
            TaskStatus::Published
        );
    }

    // -----------------------------------------------------------------------
    // Identifier construction
    // -----------------------------------------------------------------------

    #[test]
    fn test_new_claim_fields() {
        let clock = ManualClock::starting_at(Utc::now());
        let c = new_claim("t1", WALLET, Duration::hours(1), clock.as_ref());
        assert!(c.claim_id.starts_with("CLAIM-"));
        assert_eq!(c.status, ClaimStatus::Active);
        assert_eq!((c.expires_at - c.created_at).num_hours(), 1);
    }

    #[test]
    fn test_submission_ids_are_ordered() {
        let clock = ManualClock::starting_at(Utc::now());
        let c = claim(ClaimStatus::Active, WALLET, 60);
        let a = new_submission(&c, Map::new(), Map::new(), clock.as_ref());
        let b = new_submission(&c, Map::new(), Map::new(), clock.as_ref());
        let parse = |s: &str| s.trim_start_matches("SUB-").parse::<u64>().unwrap();
        assert!(parse(&a.submission_id) < parse(&b.submission_id));
    }
}
