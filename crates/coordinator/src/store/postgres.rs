//! Relational store backend (Postgres).
//!
//! Rows involved in a transition are read with `SELECT ... FOR UPDATE`
//! inside a transaction, so concurrent claims on one task and concurrent
//! approvals on one contract serialize on row locks. Transition decisions
//! come from [`crate::workflow`], identical to the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::error::{CoordinatorError, Result};
use crate::identity::{contract_id_for_proposal, normalize_contract_id, validate_wallet};
use crate::models::{
    metadata_keys, Claim, ClaimStatus, Contract, ContractFilter, ContractStatus, EscortStatus,
    MerkleProof, Proposal, ProposalStatus, Submission, SubmissionStatus, Task, TaskFilter,
    TaskStatus,
};
use crate::models::filter::paginate;
use crate::store::{Store, StoreDefaults};
use crate::validate::{validate_metadata, validate_proposal};
use crate::workflow;

/// Database connection pool wrapper.
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a connection pool from the configuration.
    ///
    /// Connection establishment is retried with bounded exponential backoff;
    /// logical errors after that surface to the caller untouched.
    pub async fn new(config: &crate::config::CoordinatorConfig) -> Result<Self> {
        const MAX_ATTEMPTS: u32 = 3;
        let database_url = config.database_url.as_deref().ok_or_else(|| {
            CoordinatorError::Config(config::ConfigError::NotFound(
                "database_url".to_string(),
            ))
        })?;
        info!("Connecting to database");
        let options = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .min_connections(config.db_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.db_connection_timeout));
        let mut delay_ms = 200;
        let mut attempt = 0;
        let pool = loop {
            match options.clone().connect(database_url).await {
                Ok(pool) => break pool,
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        error!("Failed to connect to database after {} attempts: {}", attempt, e);
                        return Err(CoordinatorError::Database(e));
                    }
                    debug!(
                        "Database connection failed (attempt {}/{}), retrying in {}ms: {}",
                        attempt, MAX_ATTEMPTS, delay_ms, e
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms * 2).min(2000);
                }
            }
        };
        info!("Database connection established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run embedded migrations in order.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");
        for (name, sql) in [
            ("0001_init.sql", include_str!("../../migrations/0001_init.sql")),
            (
                "0002_indexes.sql",
                include_str!("../../migrations/0002_indexes.sql"),
            ),
        ] {
            debug!("Running migration {}", name);
            sqlx::raw_sql(sql).execute(&self.pool).await.map_err(|e| {
                error!("Migration {} failed: {}", name, e);
                CoordinatorError::Database(e)
            })?;
        }
        info!("Database migrations completed");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// The three interchangeable identifier forms a contract id travels in.
fn id_forms(canonical: &str) -> Vec<String> {
    vec![
        canonical.to_string(),
        format!("wish-{canonical}"),
        format!("proposal-{canonical}"),
        format!("task-{canonical}"),
    ]
}

fn decode_err(context: &str) -> CoordinatorError {
    CoordinatorError::Database(sqlx::Error::Decode(context.to_string().into()))
}

fn json_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn map_contract(row: &PgRow) -> Result<Contract> {
    let status: String = row.try_get("status")?;
    let skills: Value = row.try_get("skills")?;
    Ok(Contract {
        contract_id: row.try_get("contract_id")?,
        title: row.try_get("title")?,
        total_budget_sats: row.try_get::<i64, _>("total_budget_sats")?.max(0) as u64,
        goals_count: row.try_get::<i32, _>("goals_count")?.max(0) as u32,
        available_tasks_count: 0,
        status: ContractStatus::parse(&status)
            .ok_or_else(|| decode_err("unknown contract status"))?,
        skills: serde_json::from_value(skills).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_task(row: &PgRow) -> Result<Task> {
    let status: String = row.try_get("status")?;
    let skills: Value = row.try_get("skills")?;
    let requirements: Value = row.try_get("requirements")?;
    let merkle: Option<Value> = row.try_get("merkle_proof")?;
    Ok(Task {
        task_id: row.try_get("task_id")?,
        contract_id: row.try_get("contract_id")?,
        goal_id: row.try_get("goal_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        budget_sats: row.try_get::<i64, _>("budget_sats")?.max(0) as u64,
        skills: serde_json::from_value(skills).unwrap_or_default(),
        status: TaskStatus::parse(&status).ok_or_else(|| decode_err("unknown task status"))?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        claim_expires_at: row.try_get("claim_expires_at")?,
        active_claim_id: row.try_get("active_claim_id")?,
        contractor_wallet: row.try_get("contractor_wallet")?,
        difficulty: row.try_get("difficulty")?,
        estimated_hours: row.try_get("estimated_hours")?,
        requirements: json_map(requirements),
        merkle_proof: merkle
            .map(serde_json::from_value)
            .transpose()
            .map_err(|_| decode_err("malformed merkle proof"))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_claim(row: &PgRow) -> Result<Claim> {
    let status: String = row.try_get("status")?;
    Ok(Claim {
        claim_id: row.try_get("claim_id")?,
        task_id: row.try_get("task_id")?,
        ai_identifier: row.try_get("ai_identifier")?,
        status: ClaimStatus::parse(&status).ok_or_else(|| decode_err("unknown claim status"))?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_submission(row: &PgRow) -> Result<Submission> {
    let status: String = row.try_get("status")?;
    let deliverables: Value = row.try_get("deliverables")?;
    let completion_proof: Value = row.try_get("completion_proof")?;
    Ok(Submission {
        submission_id: row.try_get("submission_id")?,
        claim_id: row.try_get("claim_id")?,
        task_id: row.try_get("task_id")?,
        status: SubmissionStatus::parse(&status)
            .ok_or_else(|| decode_err("unknown submission status"))?,
        deliverables: json_map(deliverables),
        completion_proof: json_map(completion_proof),
        rejection_reason: row.try_get("rejection_reason")?,
        rejection_type: row.try_get("rejection_type")?,
        rejected_at: row.try_get("rejected_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_proposal(row: &PgRow) -> Result<Proposal> {
    let status: String = row.try_get("status")?;
    let metadata: Value = row.try_get("metadata")?;
    let tasks: Value = row.try_get("tasks")?;
    Ok(Proposal {
        id: row.try_get("proposal_id")?,
        title: row.try_get("title")?,
        description_md: row.try_get("description_md")?,
        visible_pixel_hash: row.try_get("visible_pixel_hash")?,
        budget_sats: row.try_get::<i64, _>("budget_sats")?.max(0) as u64,
        status: ProposalStatus::parse(&status)
            .ok_or_else(|| decode_err("unknown proposal status"))?,
        metadata: json_map(metadata),
        tasks: serde_json::from_value(tasks).unwrap_or_default(),
        created_at: row.try_get("created_at")?,
    })
}

pub struct PgStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    defaults: StoreDefaults,
}

impl PgStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, defaults: StoreDefaults) -> Self {
        Self {
            pool,
            clock,
            defaults,
        }
    }

    /// Upsert a task row. Null incoming claim fields keep the stored lease;
    /// the contractor wallet is sticky.
    async fn upsert_task_row<'e, E>(&self, executor: E, task: &Task) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO mcp_tasks (
                task_id, contract_id, goal_id, title, description, budget_sats,
                skills, status, claimed_by, claimed_at, claim_expires_at,
                active_claim_id, contractor_wallet, difficulty, estimated_hours,
                requirements, merkle_proof, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (task_id)
            DO UPDATE SET
                contract_id = EXCLUDED.contract_id,
                goal_id = EXCLUDED.goal_id,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                budget_sats = EXCLUDED.budget_sats,
                skills = EXCLUDED.skills,
                status = EXCLUDED.status,
                claimed_by = COALESCE(EXCLUDED.claimed_by, mcp_tasks.claimed_by),
                claimed_at = COALESCE(EXCLUDED.claimed_at, mcp_tasks.claimed_at),
                claim_expires_at = COALESCE(EXCLUDED.claim_expires_at, mcp_tasks.claim_expires_at),
                active_claim_id = COALESCE(EXCLUDED.active_claim_id, mcp_tasks.active_claim_id),
                contractor_wallet = COALESCE(NULLIF(EXCLUDED.contractor_wallet, ''), mcp_tasks.contractor_wallet),
                difficulty = COALESCE(EXCLUDED.difficulty, mcp_tasks.difficulty),
                estimated_hours = COALESCE(EXCLUDED.estimated_hours, mcp_tasks.estimated_hours),
                requirements = EXCLUDED.requirements,
                merkle_proof = COALESCE(EXCLUDED.merkle_proof, mcp_tasks.merkle_proof),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.contract_id)
        .bind(&task.goal_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.budget_sats as i64)
        .bind(serde_json::to_value(&task.skills).unwrap_or(Value::Null))
        .bind(task.status.as_str())
        .bind(&task.claimed_by)
        .bind(task.claimed_at)
        .bind(task.claim_expires_at)
        .bind(&task.active_claim_id)
        .bind(&task.contractor_wallet)
        .bind(&task.difficulty)
        .bind(task.estimated_hours)
        .bind(Value::Object(task.requirements.clone()))
        .bind(
            task.merkle_proof
                .as_ref()
                .and_then(|p| serde_json::to_value(p).ok()),
        )
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Claims for a task, oldest first, locked for the transaction.
    async fn claims_for_task_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        task_id: &str,
    ) -> Result<Vec<Claim>> {
        let rows = sqlx::query(
            "SELECT * FROM mcp_claims WHERE task_id = $1 ORDER BY created_at FOR UPDATE",
        )
        .bind(task_id)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(map_claim).collect()
    }

    /// Count of claimable tasks under a contract.
    async fn available_tasks_count(&self, canonical: &str) -> Result<u32> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM mcp_tasks t
            WHERE t.contract_id = ANY($1)
              AND t.status NOT IN ('published', 'completed', 'submitted')
              AND NOT EXISTS (
                  SELECT 1 FROM mcp_claims c
                  WHERE c.task_id = t.task_id
                    AND ((c.status = 'active' AND c.expires_at > $2) OR c.status = 'complete')
              )
            "#,
        )
        .bind(id_forms(canonical))
        .bind(self.clock.now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")?.max(0) as u32)
    }

    /// Tasks joined with their freshest claim, effective status applied.
    /// `ids` binds as a text array to the single `$1` placeholder.
    async fn fetch_tasks_with_claims(
        &self,
        where_sql: &str,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<Task>> {
        let sql = format!(
            r#"
            SELECT t.*,
                   c.claim_id AS c_claim_id, c.task_id AS c_task_id,
                   c.ai_identifier AS c_ai_identifier, c.status AS c_status,
                   c.expires_at AS c_expires_at, c.created_at AS c_created_at
            FROM mcp_tasks t
            LEFT JOIN LATERAL (
                SELECT * FROM mcp_claims
                WHERE task_id = t.task_id
                ORDER BY created_at DESC
                LIMIT 1
            ) c ON TRUE
            {where_sql}
            ORDER BY t.created_at, t.task_id
            "#
        );
        let query = sqlx::query(&sql);
        let query = match ids {
            Some(ids) => query.bind(ids),
            None => query,
        };
        let rows = query.fetch_all(&self.pool).await?;
        let now = self.clock.now();
        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut task = map_task(row)?;
            let claim_id: Option<String> = row.try_get("c_claim_id")?;
            let latest = match claim_id {
                Some(claim_id) => {
                    let status: String = row.try_get("c_status")?;
                    Some(Claim {
                        claim_id,
                        task_id: row.try_get("c_task_id")?,
                        ai_identifier: row.try_get("c_ai_identifier")?,
                        status: ClaimStatus::parse(&status)
                            .ok_or_else(|| decode_err("unknown claim status"))?,
                        expires_at: row.try_get("c_expires_at")?,
                        created_at: row.try_get("c_created_at")?,
                    })
                }
                None => None,
            };
            task.status = workflow::effective_task_status(&task, latest.as_ref(), now);
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn write_proposal<'e, E>(&self, executor: E, proposal: &Proposal) -> Result<u64>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let contract_key = normalize_contract_id(&contract_id_for_proposal(proposal));
        let result = sqlx::query(
            r#"
            INSERT INTO mcp_proposals (
                proposal_id, contract_key, title, description_md,
                visible_pixel_hash, budget_sats, status, metadata, tasks, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (proposal_id)
            DO UPDATE SET
                contract_key = EXCLUDED.contract_key,
                title = EXCLUDED.title,
                description_md = EXCLUDED.description_md,
                visible_pixel_hash = EXCLUDED.visible_pixel_hash,
                budget_sats = EXCLUDED.budget_sats,
                status = EXCLUDED.status,
                metadata = EXCLUDED.metadata,
                tasks = EXCLUDED.tasks
            "#,
        )
        .bind(&proposal.id)
        .bind(contract_key)
        .bind(&proposal.title)
        .bind(&proposal.description_md)
        .bind(&proposal.visible_pixel_hash)
        .bind(proposal.budget_sats as i64)
        .bind(proposal.status.as_str())
        .bind(Value::Object(proposal.metadata.clone()))
        .bind(serde_json::to_value(&proposal.tasks).unwrap_or(Value::Null))
        .bind(proposal.created_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>> {
        let rows = match &filter.status {
            Some(status) => {
                sqlx::query("SELECT * FROM mcp_contracts WHERE LOWER(status) = LOWER($1)")
                    .bind(status)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM mcp_contracts")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        let mut contracts: Vec<Contract> =
            rows.iter().map(map_contract).collect::<Result<_>>()?;

        if !filter.skills.is_empty() {
            contracts.retain(|c| filter.skills.iter().any(|s| c.has_skill(s)));
        }
        for (key, wanted) in [
            (metadata_keys::CREATOR, &filter.creator),
            (metadata_keys::AI_IDENTIFIER, &filter.ai_identifier),
        ] {
            if let Some(wanted) = wanted {
                let rows = sqlx::query(
                    "SELECT DISTINCT contract_key FROM mcp_proposals WHERE metadata->>$1 = $2",
                )
                .bind(key)
                .bind(wanted)
                .fetch_all(&self.pool)
                .await?;
                let keys: std::collections::HashSet<String> = rows
                    .iter()
                    .map(|r| r.try_get::<String, _>("contract_key"))
                    .collect::<std::result::Result<_, _>>()?;
                contracts.retain(|c| keys.contains(&normalize_contract_id(&c.contract_id)));
            }
        }

        contracts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.contract_id.cmp(&b.contract_id))
        });
        let mut page = paginate(contracts, filter.offset, filter.limit);
        for contract in &mut page {
            contract.available_tasks_count = self
                .available_tasks_count(&normalize_contract_id(&contract.contract_id))
                .await?;
        }
        Ok(page)
    }

    async fn get_contract(&self, contract_id: &str) -> Result<Contract> {
        let canonical = normalize_contract_id(contract_id);
        let row = sqlx::query(
            "SELECT * FROM mcp_contracts WHERE contract_id = $1 OR contract_key = $2 ORDER BY (contract_id = $1) DESC LIMIT 1",
        )
        .bind(contract_id)
        .bind(&canonical)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoordinatorError::NotFound {
            entity: "contract",
            id: contract_id.to_string(),
        })?;
        let mut contract = map_contract(&row)?;
        contract.available_tasks_count = self
            .available_tasks_count(&normalize_contract_id(&contract.contract_id))
            .await?;
        Ok(contract)
    }

    async fn get_task(&self, task_id: &str) -> Result<Task> {
        let tasks = self
            .fetch_tasks_with_claims(
                "WHERE t.task_id = ANY($1)",
                Some(vec![task_id.to_string()]),
            )
            .await?;
        tasks
            .into_iter()
            .next()
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            })
    }

    async fn get_proposal(&self, proposal_id: &str) -> Result<Proposal> {
        let row = sqlx::query("SELECT * FROM mcp_proposals WHERE proposal_id = $1")
            .bind(proposal_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal_id.to_string(),
            })?;
        map_proposal(&row)
    }

    async fn get_claim(&self, claim_id: &str) -> Result<Claim> {
        let row = sqlx::query("SELECT * FROM mcp_claims WHERE claim_id = $1")
            .bind(claim_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "claim",
                id: claim_id.to_string(),
            })?;
        map_claim(&row)
    }

    async fn get_submission(&self, submission_id: &str) -> Result<Submission> {
        let row = sqlx::query("SELECT * FROM mcp_submissions WHERE submission_id = $1")
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "submission",
                id: submission_id.to_string(),
            })?;
        map_submission(&row)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let canonical = filter.contract_id.as_deref().map(normalize_contract_id);
        let mut tasks = match &canonical {
            Some(canonical) => {
                self.fetch_tasks_with_claims(
                    "WHERE t.contract_id = ANY($1)",
                    Some(id_forms(canonical)),
                )
                .await?
            }
            None => self.fetch_tasks_with_claims("", None).await?,
        };
        if let Some(status) = &filter.status {
            tasks.retain(|t| t.status.as_str().eq_ignore_ascii_case(status));
        }
        if let Some(claimed_by) = &filter.claimed_by {
            tasks.retain(|t| t.claimed_by.as_deref() == Some(claimed_by.as_str()));
        }
        if !filter.skills.is_empty() {
            tasks.retain(|t| {
                filter
                    .skills
                    .iter()
                    .any(|s| t.skills.iter().any(|u| u.eq_ignore_ascii_case(s)))
            });
        }
        if let Some(min) = filter.min_budget_sats {
            tasks.retain(|t| t.budget_sats >= min);
        }
        Ok(paginate(tasks, filter.offset, filter.limit))
    }

    async fn list_submissions(&self, task_ids: &[String]) -> Result<Vec<Submission>> {
        let rows = sqlx::query(
            "SELECT * FROM mcp_submissions WHERE task_id = ANY($1) ORDER BY created_at",
        )
        .bind(task_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_submission).collect()
    }

    async fn upsert_contract_with_tasks(
        &self,
        contract: Contract,
        tasks: Vec<Task>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();
        let contract_key = normalize_contract_id(&contract.contract_id);
        sqlx::query(
            r#"
            INSERT INTO mcp_contracts (
                contract_id, contract_key, title, total_budget_sats, goals_count,
                status, skills, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (contract_id)
            DO UPDATE SET
                contract_key = EXCLUDED.contract_key,
                title = EXCLUDED.title,
                total_budget_sats = EXCLUDED.total_budget_sats,
                goals_count = EXCLUDED.goals_count,
                status = EXCLUDED.status,
                skills = EXCLUDED.skills,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&contract.contract_id)
        .bind(&contract_key)
        .bind(&contract.title)
        .bind(contract.total_budget_sats as i64)
        .bind(contract.goals_count as i32)
        .bind(contract.status.as_str())
        .bind(serde_json::to_value(&contract.skills).unwrap_or(Value::Null))
        .bind(contract.created_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        for task in &tasks {
            self.upsert_task_row(&mut *tx, task).await?;
        }
        tx.commit().await?;
        debug!(
            "Upserted contract {} with {} tasks",
            contract.contract_id,
            tasks.len()
        );
        Ok(())
    }

    async fn upsert_task(&self, task: Task) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();
        sqlx::query("SELECT task_id FROM mcp_tasks WHERE task_id = $1 FOR UPDATE")
            .bind(&task.task_id)
            .fetch_optional(&mut *tx)
            .await?;
        if task.status == TaskStatus::Claimed {
            let claims = self.claims_for_task_tx(&mut tx, &task.task_id).await?;
            if let Some(active) = claims.iter().find(|c| c.is_active(now)) {
                if task.claimed_by.as_deref() != Some(active.ai_identifier.as_str()) {
                    return Err(CoordinatorError::task_already_claimed());
                }
            }
        }
        self.upsert_task_row(&mut *tx, &task).await?;
        let row = sqlx::query("SELECT * FROM mcp_tasks WHERE task_id = $1")
            .bind(&task.task_id)
            .fetch_one(&mut *tx)
            .await?;
        let merged = map_task(&row)?;
        tx.commit().await?;
        Ok(merged)
    }

    async fn create_proposal(&self, proposal: Proposal) -> Result<Proposal> {
        let mut proposal = proposal;
        if proposal.budget_sats == 0 {
            proposal.budget_sats = self.defaults.budget_sats;
        }
        validate_proposal(&proposal)?;
        proposal.created_at = self.clock.now();
        let exists = sqlx::query("SELECT 1 FROM mcp_proposals WHERE proposal_id = $1")
            .bind(&proposal.id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            return Err(CoordinatorError::Conflict(format!(
                "proposal {} already exists",
                proposal.id
            )));
        }
        self.write_proposal(&self.pool, &proposal).await?;
        info!("Created proposal {}", proposal.id);
        Ok(proposal)
    }

    async fn update_proposal(&self, proposal: Proposal) -> Result<Proposal> {
        validate_proposal(&proposal)?;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM mcp_proposals WHERE proposal_id = $1 FOR UPDATE")
            .bind(&proposal.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal.id.clone(),
            })?;
        let existing = map_proposal(&row)?;
        if existing.status != ProposalStatus::Pending {
            return Err(CoordinatorError::InvalidState {
                current: existing.status.to_string(),
                required: "pending".to_string(),
            });
        }
        let mut updated = proposal;
        updated.created_at = existing.created_at;
        self.write_proposal(&mut *tx, &updated).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn update_proposal_metadata(
        &self,
        proposal_id: &str,
        updates: Map<String, Value>,
    ) -> Result<Proposal> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM mcp_proposals WHERE proposal_id = $1 FOR UPDATE")
            .bind(proposal_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal_id.to_string(),
            })?;
        let mut proposal = map_proposal(&row)?;
        for (key, value) in updates {
            proposal.metadata.insert(key, value);
        }
        validate_metadata(&proposal.metadata)?;
        self.write_proposal(&mut *tx, &proposal).await?;
        tx.commit().await?;
        Ok(proposal)
    }

    async fn approve_proposal(&self, proposal_id: &str) -> Result<Proposal> {
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();

        // Read the contract key without locking, then lock the whole sibling
        // group in one ordered statement. Concurrent approvals on the same
        // contract serialize here without lock-order inversion.
        let key_row = sqlx::query("SELECT contract_key FROM mcp_proposals WHERE proposal_id = $1")
            .bind(proposal_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal_id.to_string(),
            })?;
        let canonical: String = key_row.try_get("contract_key")?;
        let group_rows = sqlx::query(
            "SELECT * FROM mcp_proposals WHERE contract_key = $1 OR proposal_id = $2 ORDER BY proposal_id FOR UPDATE",
        )
        .bind(&canonical)
        .bind(proposal_id)
        .fetch_all(&mut *tx)
        .await?;
        let mut proposal: Option<Proposal> = None;
        // Winner check first: a proposal auto-rejected by a concurrent
        // approval should surface the race as CONFLICT, not INVALID_STATE.
        for group_row in &group_rows {
            let sibling = map_proposal(group_row)?;
            if sibling.id == proposal_id {
                proposal = Some(sibling);
            } else if workflow::blocks_approval(&sibling) {
                return Err(CoordinatorError::proposal_already_approved(&canonical));
            }
        }
        let mut proposal = proposal.ok_or_else(|| CoordinatorError::NotFound {
            entity: "proposal",
            id: proposal_id.to_string(),
        })?;
        workflow::check_approvable(&proposal)?;
        // The stored key is what the group lock used; the derived form is
        // authoritative for the effects below.
        let canonical = normalize_contract_id(&contract_id_for_proposal(&proposal));

        let mut tasks = proposal.tasks.clone();
        if tasks.is_empty() {
            let rows = sqlx::query(
                "SELECT * FROM mcp_tasks WHERE contract_id = ANY($1) FOR UPDATE",
            )
            .bind(id_forms(&canonical))
            .fetch_all(&mut *tx)
            .await?;
            tasks = rows.iter().map(map_task).collect::<Result<_>>()?;
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

        for task in &mut tasks {
            task.status = TaskStatus::Approved;
            task.updated_at = now;
            self.upsert_task_row(&mut *tx, task).await?;
        }
        sqlx::query(
            "UPDATE mcp_tasks SET status = 'approved', updated_at = $2 WHERE contract_id = ANY($1) AND status NOT IN ('published', 'completed')",
        )
        .bind(id_forms(&canonical))
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE mcp_proposals SET status = 'rejected' WHERE contract_key = $1 AND proposal_id <> $2 AND status = 'pending'",
        )
        .bind(&canonical)
        .bind(proposal_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE mcp_contracts SET status = 'superseded', updated_at = $2 WHERE contract_id = $1",
        )
        .bind(format!("wish-{canonical}"))
        .bind(now)
        .execute(&mut *tx)
        .await?;

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
        sqlx::query(
            r#"
            INSERT INTO mcp_contracts (
                contract_id, contract_key, title, total_budget_sats, goals_count,
                status, skills, created_at, updated_at
            )
            VALUES ($1, $1, $2, $3, $4, 'active', $5, $6, $6)
            ON CONFLICT (contract_id)
            DO UPDATE SET
                title = EXCLUDED.title,
                total_budget_sats = EXCLUDED.total_budget_sats,
                goals_count = EXCLUDED.goals_count,
                skills = EXCLUDED.skills,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&canonical)
        .bind(&proposal.title)
        .bind(proposal.budget_sats as i64)
        .bind(goals.len().max(1) as i32)
        .bind(serde_json::to_value(&skills).unwrap_or(Value::Null))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        proposal.status = ProposalStatus::Approved;
        proposal.tasks = tasks;
        self.write_proposal(&mut *tx, &proposal).await?;
        tx.commit().await?;
        info!(
            "Approved proposal {} for contract {} ({} tasks)",
            proposal.id,
            canonical,
            proposal.tasks.len()
        );
        Ok(proposal)
    }

    async fn publish_proposal(&self, proposal_id: &str) -> Result<Proposal> {
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();
        let row = sqlx::query("SELECT * FROM mcp_proposals WHERE proposal_id = $1 FOR UPDATE")
            .bind(proposal_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "proposal",
                id: proposal_id.to_string(),
            })?;
        let mut proposal = map_proposal(&row)?;
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
        sqlx::query(
            r#"
            UPDATE mcp_claims SET status = 'complete'
            WHERE status IN ('active', 'submitted', 'pending_review', 'approved')
              AND task_id IN (SELECT task_id FROM mcp_tasks WHERE contract_id = ANY($1))
            "#,
        )
        .bind(id_forms(&canonical))
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE mcp_tasks SET status = 'published', updated_at = $2
            WHERE contract_id = ANY($1)
              AND status IN ('submitted', 'pending_review', 'claimed', 'approved')
            "#,
        )
        .bind(id_forms(&canonical))
        .bind(now)
        .execute(&mut *tx)
        .await?;
        proposal.status = ProposalStatus::Published;
        self.write_proposal(&mut *tx, &proposal).await?;
        tx.commit().await?;
        info!("Published proposal {} (contract {})", proposal_id, canonical);
        Ok(proposal)
    }

    async fn confirm_contract(&self, contract_id: &str) -> Result<()> {
        let canonical = normalize_contract_id(contract_id);
        let now = self.clock.now();
        let result = sqlx::query(
            "UPDATE mcp_contracts SET status = 'confirmed', updated_at = $2 WHERE contract_key = $1",
        )
        .bind(&canonical)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoordinatorError::NotFound {
                entity: "contract",
                id: contract_id.to_string(),
            });
        }
        sqlx::query(
            "UPDATE mcp_proposals SET status = 'confirmed' WHERE contract_key = $1 AND status IN ('approved', 'published')",
        )
        .bind(&canonical)
        .execute(&self.pool)
        .await?;
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
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();
        let row = sqlx::query("SELECT * FROM mcp_tasks WHERE task_id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            })?;
        let task = map_task(&row)?;
        let claims = self.claims_for_task_tx(&mut tx, task_id).await?;
        match workflow::resolve_claim(&task, &claims, wallet, now)? {
            workflow::ClaimDecision::Existing(claim) => {
                sqlx::query(
                    "UPDATE mcp_tasks SET contractor_wallet = COALESCE(NULLIF(contractor_wallet, ''), $2) WHERE task_id = $1",
                )
                .bind(task_id)
                .bind(wallet)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
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
                sqlx::query(
                    r#"
                    INSERT INTO mcp_claims (claim_id, task_id, ai_identifier, status, expires_at, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(&claim.claim_id)
                .bind(&claim.task_id)
                .bind(&claim.ai_identifier)
                .bind(claim.status.as_str())
                .bind(claim.expires_at)
                .bind(claim.created_at)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    r#"
                    UPDATE mcp_tasks SET
                        status = 'claimed',
                        claimed_by = $2,
                        claimed_at = $3,
                        claim_expires_at = $4,
                        active_claim_id = $5,
                        contractor_wallet = COALESCE(NULLIF(contractor_wallet, ''), $2),
                        estimated_hours = COALESCE($6, estimated_hours),
                        updated_at = $3
                    WHERE task_id = $1
                    "#,
                )
                .bind(task_id)
                .bind(wallet)
                .bind(claim.created_at)
                .bind(claim.expires_at)
                .bind(&claim.claim_id)
                .bind(estimated_hours)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();
        let row = sqlx::query("SELECT * FROM mcp_claims WHERE claim_id = $1 FOR UPDATE")
            .bind(claim_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "claim",
                id: claim_id.to_string(),
            })?;
        let claim = map_claim(&row)?;
        let prior_rows = sqlx::query(
            "SELECT * FROM mcp_submissions WHERE claim_id = $1 ORDER BY created_at FOR UPDATE",
        )
        .bind(claim_id)
        .fetch_all(&mut *tx)
        .await?;
        let priors: Vec<Submission> =
            prior_rows.iter().map(map_submission).collect::<Result<_>>()?;
        match workflow::check_submit(&claim, &priors, now)? {
            workflow::SubmitDecision::Expired => {
                sqlx::query("UPDATE mcp_claims SET status = 'expired' WHERE claim_id = $1")
                    .bind(claim_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Err(CoordinatorError::Expired {
                    expired_at: claim.expires_at.to_rfc3339(),
                });
            }
            workflow::SubmitDecision::Reactivate => {
                sqlx::query("UPDATE mcp_claims SET status = 'active' WHERE claim_id = $1")
                    .bind(claim_id)
                    .execute(&mut *tx)
                    .await?;
            }
            workflow::SubmitDecision::Proceed => {}
        }
        let submission =
            workflow::new_submission(&claim, deliverables, completion_proof, self.clock.as_ref());
        sqlx::query(
            r#"
            INSERT INTO mcp_submissions (
                submission_id, claim_id, task_id, status, deliverables,
                completion_proof, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&submission.submission_id)
        .bind(&submission.claim_id)
        .bind(&submission.task_id)
        .bind(submission.status.as_str())
        .bind(Value::Object(submission.deliverables.clone()))
        .bind(Value::Object(submission.completion_proof.clone()))
        .bind(submission.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE mcp_tasks SET status = 'submitted', updated_at = $2 WHERE task_id = $1")
            .bind(&claim.task_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE mcp_claims SET status = 'submitted' WHERE claim_id = $1")
            .bind(claim_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();
        let row = sqlx::query("SELECT * FROM mcp_submissions WHERE submission_id = $1 FOR UPDATE")
            .bind(submission_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "submission",
                id: submission_id.to_string(),
            })?;
        let mut submission = map_submission(&row)?;
        workflow::check_reviewable(&submission)?;

        match action {
            workflow::ReviewAction::Accept => {
                submission.status = SubmissionStatus::Accepted;
                sqlx::query("UPDATE mcp_claims SET status = 'complete' WHERE claim_id = $1")
                    .bind(&submission.claim_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE mcp_tasks SET status = 'approved', updated_at = $2 WHERE task_id = $1",
                )
                .bind(&submission.task_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "UPDATE mcp_submissions SET status = 'accepted' WHERE submission_id = $1",
                )
                .bind(submission_id)
                .execute(&mut *tx)
                .await?;
            }
            workflow::ReviewAction::Reject => {
                submission.status = SubmissionStatus::Rejected;
                submission.rejection_reason = (!notes.is_empty()).then(|| notes.to_string());
                submission.rejection_type =
                    (!rejection_type.is_empty()).then(|| rejection_type.to_string());
                submission.rejected_at = Some(now);
                sqlx::query("UPDATE mcp_claims SET status = 'rejected' WHERE claim_id = $1")
                    .bind(&submission.claim_id)
                    .execute(&mut *tx)
                    .await?;
                // Release the lease; the contractor wallet stays (sticky).
                sqlx::query(
                    r#"
                    UPDATE mcp_tasks SET
                        status = 'available',
                        claimed_by = NULL,
                        claimed_at = NULL,
                        claim_expires_at = NULL,
                        active_claim_id = NULL,
                        updated_at = $2
                    WHERE task_id = $1
                    "#,
                )
                .bind(&submission.task_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    r#"
                    UPDATE mcp_submissions SET
                        status = 'rejected',
                        rejection_reason = $2,
                        rejection_type = $3,
                        rejected_at = $4
                    WHERE submission_id = $1
                    "#,
                )
                .bind(submission_id)
                .bind(&submission.rejection_reason)
                .bind(&submission.rejection_type)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            workflow::ReviewAction::Review => {
                submission.status = SubmissionStatus::Reviewed;
                sqlx::query(
                    "UPDATE mcp_submissions SET status = 'reviewed' WHERE submission_id = $1",
                )
                .bind(submission_id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        info!(
            "Submission {} reviewed as {}",
            submission_id, submission.status
        );
        Ok(submission)
    }

    async fn update_task_proof(&self, task_id: &str, proof: MerkleProof) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();
        let row = sqlx::query("SELECT * FROM mcp_tasks WHERE task_id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            })?;
        let task = map_task(&row)?;
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
        sqlx::query(
            r#"
            UPDATE mcp_tasks SET
                merkle_proof = $2,
                contractor_wallet = COALESCE(NULLIF(contractor_wallet, ''), NULLIF($3, '')),
                updated_at = $4
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(serde_json::to_value(&proof).unwrap_or(Value::Null))
        .bind(&proof.contractor_wallet)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.get_task(task_id).await
    }

    async fn sync_claim(&self, claim: Claim) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = self.clock.now();
        let local = self.claims_for_task_tx(&mut tx, &claim.task_id).await?;
        if let Some(active) = local.iter().find(|c| c.is_active(now)) {
            if active.ai_identifier != claim.ai_identifier {
                return Err(CoordinatorError::task_already_claimed());
            }
        }
        sqlx::query(
            r#"
            INSERT INTO mcp_claims (claim_id, task_id, ai_identifier, status, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (claim_id)
            DO UPDATE SET
                status = EXCLUDED.status,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&claim.claim_id)
        .bind(&claim.task_id)
        .bind(&claim.ai_identifier)
        .bind(claim.status.as_str())
        .bind(claim.expires_at)
        .bind(claim.created_at)
        .execute(&mut *tx)
        .await?;
        if claim.is_active(now) {
            sqlx::query(
                r#"
                UPDATE mcp_tasks SET
                    status = 'claimed',
                    claimed_by = $2,
                    claimed_at = $3,
                    claim_expires_at = $4,
                    active_claim_id = $5,
                    contractor_wallet = COALESCE(NULLIF(contractor_wallet, ''), $2),
                    updated_at = $3
                WHERE task_id = $1
                "#,
            )
            .bind(&claim.task_id)
            .bind(&claim.ai_identifier)
            .bind(claim.created_at)
            .bind(claim.expires_at)
            .bind(&claim.claim_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn sync_submission(&self, submission: Submission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mcp_submissions (
                submission_id, claim_id, task_id, status, deliverables,
                completion_proof, rejection_reason, rejection_type, rejected_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (submission_id)
            DO UPDATE SET
                status = EXCLUDED.status,
                deliverables = EXCLUDED.deliverables,
                completion_proof = EXCLUDED.completion_proof,
                rejection_reason = EXCLUDED.rejection_reason,
                rejection_type = EXCLUDED.rejection_type,
                rejected_at = EXCLUDED.rejected_at
            "#,
        )
        .bind(&submission.submission_id)
        .bind(&submission.claim_id)
        .bind(&submission.task_id)
        .bind(submission.status.as_str())
        .bind(Value::Object(submission.deliverables.clone()))
        .bind(Value::Object(submission.completion_proof.clone()))
        .bind(&submission.rejection_reason)
        .bind(&submission.rejection_type)
        .bind(submission.rejected_at)
        .bind(submission.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sync_escort_status(&self, status: EscortStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mcp_escort_status (task_id, proof_status, last_checked, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (task_id)
            DO UPDATE SET
                proof_status = EXCLUDED.proof_status,
                last_checked = EXCLUDED.last_checked,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(&status.task_id)
        .bind(&status.proof_status)
        .bind(status.last_checked)
        .bind(Value::Object(status.payload.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::Utc;

    async fn test_store() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let mut config: crate::config::CoordinatorConfig =
            serde_json::from_str("{}").ok()?;
        config.database_url = Some(url);
        let db = Database::new(&config).await.ok()?;
        db.migrate().await.ok()?;
        Some(PgStore::new(
            db.pool().clone(),
            Arc::new(SystemClock::new()),
            StoreDefaults::default(),
        ))
    }

    #[test]
    fn test_id_forms_cover_legacy_prefixes() {
        let forms = id_forms("abc");
        assert!(forms.contains(&"abc".to_string()));
        assert!(forms.contains(&"wish-abc".to_string()));
        assert!(forms.contains(&"proposal-abc".to_string()));
        assert!(forms.contains(&"task-abc".to_string()));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_round_trip() {
        // Requires DATABASE_URL pointing at a scratch database.
        let Some(store) = test_store().await else {
            return;
        };
        let now = Utc::now();
        let contract = Contract {
            contract_id: "pg-test-contract".to_string(),
            title: "Round trip".to_string(),
            total_budget_sats: 1000,
            goals_count: 1,
            available_tasks_count: 0,
            status: ContractStatus::Active,
            skills: vec!["rust".to_string()],
            created_at: now,
            updated_at: now,
        };
        store
            .upsert_contract_with_tasks(contract, vec![])
            .await
            .unwrap();
        let fetched = store.get_contract("pg-test-contract").await.unwrap();
        assert_eq!(fetched.title, "Round trip");
    }
}
