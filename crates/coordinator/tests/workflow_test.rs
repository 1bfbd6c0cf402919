//! End-to-end workflow tests over the in-memory store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};

use stargate_coordinator::clock::ManualClock;
use stargate_coordinator::error::CoordinatorError;
use stargate_coordinator::models::{
    ClaimStatus, ContractStatus, Proposal, ProposalStatus, Task, TaskFilter, TaskStatus,
};
use stargate_coordinator::store::{MemoryStore, Store, StoreDefaults};

const HASH: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";
const WALLET: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
const OTHER_WALLET: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

fn store_with_ttl(claim_ttl: chrono::Duration) -> (Arc<MemoryStore>, Arc<ManualClock>) {
    let clock = ManualClock::starting_at(Utc::now());
    let defaults = StoreDefaults {
        budget_sats: 100_000,
        claim_ttl,
    };
    (
        Arc::new(MemoryStore::new(clock.clone(), defaults)),
        clock,
    )
}

fn store() -> (Arc<MemoryStore>, Arc<ManualClock>) {
    store_with_ttl(chrono::Duration::hours(1))
}

fn task(task_id: &str, contract_id: &str, budget: u64) -> Task {
    let now = Utc::now();
    Task {
        task_id: task_id.to_string(),
        contract_id: contract_id.to_string(),
        goal_id: format!("{task_id}-goal"),
        title: "T".to_string(),
        description: String::new(),
        budget_sats: budget,
        skills: vec![],
        status: TaskStatus::Available,
        claimed_by: None,
        claimed_at: None,
        claim_expires_at: None,
        active_claim_id: None,
        contractor_wallet: None,
        difficulty: None,
        estimated_hours: None,
        requirements: Map::new(),
        merkle_proof: None,
        created_at: now,
        updated_at: now,
    }
}

fn proposal(id: &str, hash: &str, tasks: Vec<Task>) -> Proposal {
    Proposal {
        id: id.to_string(),
        title: format!("Proposal {id}"),
        description_md: String::new(),
        visible_pixel_hash: hash.to_string(),
        budget_sats: 1000,
        status: ProposalStatus::Pending,
        metadata: Map::new(),
        tasks,
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_happy_path_create_approve_claim_submit_accept() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("p1-t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();

    let claim = store.claim_task("p1-t1", WALLET, None).await.unwrap();
    assert!(claim.claim_id.starts_with("CLAIM-"));

    let mut deliverables = Map::new();
    deliverables.insert("notes".to_string(), json!("done"));
    let submission = store
        .submit_work(&claim.claim_id, deliverables, Map::new())
        .await
        .unwrap();
    assert!(submission.submission_id.starts_with("SUB-"));

    store
        .update_submission_status(&submission.submission_id, "accepted", "", "")
        .await
        .unwrap();

    let task = store.get_task("p1-t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Approved);
    let claim = store.get_claim(&claim.claim_id).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Complete);
}

// ---------------------------------------------------------------------------
// Scenario 2 / P3: double and concurrent approval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_double_approval_rejected() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p-a", HASH, vec![task("ta", HASH, 500)]))
        .await
        .unwrap();
    store
        .create_proposal(proposal("p-b", HASH, vec![task("tb", HASH, 500)]))
        .await
        .unwrap();

    store.approve_proposal("p-a").await.unwrap();
    let err = store.approve_proposal("p-b").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Conflict(_)));

    assert_eq!(
        store.get_proposal("p-a").await.unwrap().status,
        ProposalStatus::Approved
    );
    assert_eq!(
        store.get_proposal("p-b").await.unwrap().status,
        ProposalStatus::Rejected
    );
}

#[tokio::test]
async fn test_concurrent_approvals_yield_single_winner() {
    for round in 0..10 {
        let (store, _) = store();
        let hash = format!("{:064}", round);
        store
            .create_proposal(proposal("p-a", &hash, vec![task("ta", &hash, 500)]))
            .await
            .unwrap();
        store
            .create_proposal(proposal("p-b", &hash, vec![task("tb", &hash, 500)]))
            .await
            .unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.approve_proposal("p-a").await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.approve_proposal("p-b").await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one approval must win");
        let loser_err = results.iter().find(|r| r.is_err()).unwrap();
        assert!(matches!(
            loser_err.as_ref().unwrap_err(),
            CoordinatorError::Conflict(_)
        ));
    }
}

// ---------------------------------------------------------------------------
// P1 / P2: claim exclusivity and idempotent reclaim
// ---------------------------------------------------------------------------

fn wallet_for(tag: char) -> String {
    // Valid bech32 shape, distinct per tag.
    format!("bc1q{}", format!("agent{tag}").repeat(7))
}

#[tokio::test]
async fn test_concurrent_claims_exactly_one_winner() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("p1-t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();

    let tags = ['a', 'c', 'd', 'e', 'f', 'g', 'h', 'j'];
    let mut handles = Vec::new();
    for tag in tags {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim_task("p1-t1", &wallet_for(tag), None).await
        }));
    }
    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(CoordinatorError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(conflicts, tags.len() - 1);
}

#[tokio::test]
async fn test_idempotent_reclaim_returns_same_claim_id() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("p1-t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();

    let first = store.claim_task("p1-t1", WALLET, None).await.unwrap();
    let second = store.claim_task("p1-t1", WALLET, None).await.unwrap();
    assert_eq!(first.claim_id, second.claim_id);

    let err = store
        .claim_task("p1-t1", OTHER_WALLET, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Conflict(_)));
}

// ---------------------------------------------------------------------------
// Scenario 3: expired claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_expired_claim_fails_submit_and_releases_task() {
    let (store, clock) = store_with_ttl(chrono::Duration::milliseconds(1));
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();

    let claim = store.claim_task("t1", WALLET, None).await.unwrap();
    clock.advance_millis(10);

    let err = store
        .submit_work(&claim.claim_id, Map::new(), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Expired { .. }));
    assert_eq!(
        store.get_claim(&claim.claim_id).await.unwrap().status,
        ClaimStatus::Expired
    );

    let next = store.claim_task("t1", OTHER_WALLET, None).await.unwrap();
    assert_ne!(next.claim_id, claim.claim_id);
}

// ---------------------------------------------------------------------------
// Scenario 4 / P4: rejection releases the lease, gates resubmission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rejection_releases_lease_for_other_wallet() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();

    let claim = store.claim_task("t1", WALLET, None).await.unwrap();
    let submission = store
        .submit_work(&claim.claim_id, Map::new(), Map::new())
        .await
        .unwrap();
    store
        .update_submission_status(&submission.submission_id, "rejected", "incomplete", "quality")
        .await
        .unwrap();

    let task = store.get_task("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Available);
    assert!(task.claimed_by.is_none());
    assert!(task.active_claim_id.is_none());

    let reviewed = store.get_submission(&submission.submission_id).await.unwrap();
    assert_eq!(reviewed.rejection_reason.as_deref(), Some("incomplete"));
    assert_eq!(reviewed.rejection_type.as_deref(), Some("quality"));
    assert!(reviewed.rejected_at.is_some());

    store.claim_task("t1", OTHER_WALLET, None).await.unwrap();
}

#[tokio::test]
async fn test_resubmission_allowed_only_after_rejection_or_review() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();
    let claim = store.claim_task("t1", WALLET, None).await.unwrap();

    let first = store
        .submit_work(&claim.claim_id, Map::new(), Map::new())
        .await
        .unwrap();

    // Pending review: a second submit is not allowed.
    let err = store
        .submit_work(&claim.claim_id, Map::new(), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));

    // A "reviewed" verdict is non-terminal and reopens the gate.
    store
        .update_submission_status(&first.submission_id, "review", "", "")
        .await
        .unwrap();
    let second = store
        .submit_work(&claim.claim_id, Map::new(), Map::new())
        .await
        .unwrap();
    assert_ne!(first.submission_id, second.submission_id);

    let submissions = store.list_submissions(&["t1".to_string()]).await.unwrap();
    assert_eq!(submissions.len(), 2);
    assert!(submissions[0].created_at <= submissions[1].created_at);
}

// ---------------------------------------------------------------------------
// P5: wallet stickiness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_task_proof_update_preserves_wallet() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();
    store.claim_task("t1", WALLET, None).await.unwrap();

    let proof = stargate_coordinator::models::MerkleProof {
        visible_pixel_hash: HASH.to_string(),
        funded_amount_sats: 1000,
        funding_address: "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".to_string(),
        contractor_wallet: String::new(),
        confirmation_status: stargate_coordinator::models::ConfirmationStatus::Provisional,
    };
    let task = store.update_task_proof("t1", proof).await.unwrap();
    assert_eq!(task.contractor_wallet.as_deref(), Some(WALLET));
    assert_eq!(task.merkle_proof.unwrap().contractor_wallet, WALLET);
}

// ---------------------------------------------------------------------------
// P6: identity forms are interchangeable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_wish_prefixed_metadata_resolves_to_same_contract() {
    let (store, _) = store();
    let mut p = proposal("p1", "", vec![task("t1", HASH, 1000)]);
    p.metadata
        .insert("contract_id".to_string(), json!(format!("wish-{HASH}")));
    p.metadata
        .insert("visible_pixel_hash".to_string(), json!(HASH));
    store.create_proposal(p).await.unwrap();
    store.approve_proposal("p1").await.unwrap();

    // All three forms reach the same contract row.
    for form in [HASH.to_string(), format!("wish-{HASH}"), format!("proposal-{HASH}")] {
        let contract = store.get_contract(&form).await.unwrap();
        assert_eq!(contract.contract_id, HASH);
    }
}

#[tokio::test]
async fn test_approval_supersedes_wish_contract() {
    let (store, _) = store();
    let now = Utc::now();
    let wish = stargate_coordinator::models::Contract {
        contract_id: format!("wish-{HASH}"),
        title: "Wish".to_string(),
        total_budget_sats: 1000,
        goals_count: 1,
        available_tasks_count: 0,
        status: ContractStatus::Active,
        skills: vec![],
        created_at: now,
        updated_at: now,
    };
    store.upsert_contract_with_tasks(wish, vec![]).await.unwrap();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();

    let wish = store.get_contract(&format!("wish-{HASH}")).await.unwrap();
    // Lookup under normalization may return the canonical row; fetch both.
    let all = store
        .list_contracts(&Default::default())
        .await
        .unwrap();
    let wish_row = all
        .iter()
        .find(|c| c.contract_id == format!("wish-{HASH}"))
        .unwrap();
    assert_eq!(wish_row.status, ContractStatus::Superseded);
    assert!(matches!(
        wish.status,
        ContractStatus::Active | ContractStatus::Superseded
    ));
}

// ---------------------------------------------------------------------------
// P10: terminal monotonicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_accepted_task_cannot_be_reclaimed_or_rereviewed() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();
    let claim = store.claim_task("t1", WALLET, None).await.unwrap();
    let submission = store
        .submit_work(&claim.claim_id, Map::new(), Map::new())
        .await
        .unwrap();
    store
        .update_submission_status(&submission.submission_id, "accepted", "", "")
        .await
        .unwrap();

    let err = store.claim_task("t1", OTHER_WALLET, None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));

    let err = store
        .update_submission_status(&submission.submission_id, "rejected", "", "")
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));

    assert_eq!(
        store.get_task("t1").await.unwrap().status,
        TaskStatus::Approved
    );
}

#[tokio::test]
async fn test_published_task_is_terminal() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();
    store.publish_proposal("p1").await.unwrap();

    assert_eq!(
        store.get_task("t1").await.unwrap().status,
        TaskStatus::Published
    );
    let err = store.claim_task("t1", WALLET, None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));
    assert_eq!(
        store.get_proposal("p1").await.unwrap().status,
        ProposalStatus::Published
    );

    // Publish is idempotent.
    store.publish_proposal("p1").await.unwrap();
}

// ---------------------------------------------------------------------------
// Publish finalizes live claims
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_publish_completes_active_claims() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();
    let claim = store.claim_task("t1", WALLET, None).await.unwrap();
    store.publish_proposal("p1").await.unwrap();

    assert_eq!(
        store.get_claim(&claim.claim_id).await.unwrap().status,
        ClaimStatus::Complete
    );
}

// ---------------------------------------------------------------------------
// Confirmation feed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_confirmation_promotes_winning_proposal() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();
    store.confirm_contract(&format!("wish-{HASH}")).await.unwrap();

    assert_eq!(
        store.get_contract(HASH).await.unwrap().status,
        ContractStatus::Confirmed
    );
    assert_eq!(
        store.get_proposal("p1").await.unwrap().status,
        ProposalStatus::Confirmed
    );
}

// ---------------------------------------------------------------------------
// Scenario 6 / P9: adversarial inputs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_script_tag_in_metadata_rejected() {
    let (store, _) = store();
    let mut p = proposal("p1", HASH, vec![]);
    p.metadata
        .insert("title".to_string(), json!("<script>alert(1)</script>"));
    let err = store.create_proposal(p).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Validation { .. }));
}

#[tokio::test]
async fn test_deeply_nested_metadata_string_rejected() {
    let (store, _) = store();
    let mut value = json!({"__proto__": {"x": 1}});
    for _ in 0..9 {
        value = json!({ "n": value });
    }
    let mut p = proposal("p1", HASH, vec![]);
    p.metadata
        .insert("evil".to_string(), json!(value.to_string()));
    let err = store.create_proposal(p).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Validation { .. }));
}

#[tokio::test]
async fn test_zero_budget_task_blocks_approval() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 0)]))
        .await
        .unwrap();
    let err = store.approve_proposal("p1").await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Validation { .. }));
}

// ---------------------------------------------------------------------------
// Listing and effective statuses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_list_tasks_reflects_claim_state() {
    let (store, _) = store();
    store
        .create_proposal(proposal(
            "p1",
            HASH,
            vec![task("t1", HASH, 1000), task("t2", HASH, 500)],
        ))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();
    store.claim_task("t1", WALLET, None).await.unwrap();

    let claimed = store
        .list_tasks(&TaskFilter {
            contract_id: Some(HASH.to_string()),
            status: Some("claimed".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].task_id, "t1");

    let by_wallet = store
        .list_tasks(&TaskFilter {
            claimed_by: Some(WALLET.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_wallet.len(), 1);

    let min_budget = store
        .list_tasks(&TaskFilter {
            contract_id: Some(HASH.to_string()),
            min_budget_sats: Some(800),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(min_budget.len(), 1);
    assert_eq!(min_budget[0].task_id, "t1");
}

#[tokio::test]
async fn test_tasks_derived_from_markdown_when_missing() {
    let (store, _) = store();
    let mut p = proposal("p1", HASH, vec![]);
    p.description_md = "### Task 1: Implement the engine\nbody\n### Task 2: Test the engine\nbody"
        .to_string();
    store.create_proposal(p).await.unwrap();
    let approved = store.approve_proposal("p1").await.unwrap();
    assert_eq!(approved.tasks.len(), 2);
    assert!(approved.tasks.iter().all(|t| t.budget_sats > 0));
    assert!(approved
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Approved));

    let tasks = store
        .list_tasks(&TaskFilter {
            contract_id: Some(HASH.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tasks.len(), 2);
}

#[tokio::test]
async fn test_update_proposal_only_while_pending() {
    let (store, _) = store();
    store
        .create_proposal(proposal("p1", HASH, vec![task("t1", HASH, 1000)]))
        .await
        .unwrap();
    store.approve_proposal("p1").await.unwrap();

    let err = store
        .update_proposal(proposal("p1", HASH, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidState { .. }));

    // Metadata updates have no status gate.
    let mut updates = Map::new();
    updates.insert("funding_address".to_string(), Value::String(WALLET.to_string()));
    let updated = store.update_proposal_metadata("p1", updates).await.unwrap();
    assert_eq!(
        updated.metadata.get("funding_address").and_then(Value::as_str),
        Some(WALLET)
    );
}
