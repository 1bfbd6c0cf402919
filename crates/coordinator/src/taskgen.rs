//! Markdown → task derivation.
//!
//! Used at approval time when a proposal ships a free-form description
//! instead of structured tasks. `### Task` headers open tasks; section
//! headers that are clearly not work items (budget, timeline, ...) are
//! skipped; budgets are split across categories proportionally.

use chrono::{DateTime, Utc};
use serde_json::Map;

use crate::models::{Task, TaskStatus};

/// Section titles that never describe work items.
const NON_TASK_PATTERNS: [&str; 8] = [
    "budget",
    "timeline",
    "success metrics",
    "requirements",
    "overview",
    "summary",
    "notes",
    "acceptance criteria",
];

/// Verbs that mark a title as a work item regardless of length.
const TASK_VERBS: [&str; 16] = [
    "implement",
    "build",
    "design",
    "test",
    "document",
    "create",
    "develop",
    "write",
    "integrate",
    "deploy",
    "add",
    "fix",
    "refactor",
    "research",
    "migrate",
    "review",
];

/// Keyword → skill tags, matched against the lowercased title.
const SKILL_TABLE: [(&str, &[&str]); 9] = [
    ("api", &["backend", "api"]),
    ("backend", &["backend"]),
    ("frontend", &["frontend"]),
    ("ui", &["frontend", "design"]),
    ("test", &["testing"]),
    ("document", &["documentation"]),
    ("deploy", &["devops"]),
    ("database", &["database"]),
    ("bitcoin", &["bitcoin"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BudgetCategory {
    Planning,
    Implementation,
    Testing,
    Documentation,
}

impl BudgetCategory {
    fn pct(&self) -> u64 {
        match self {
            Self::Planning => 20,
            Self::Implementation => 50,
            Self::Testing => 20,
            Self::Documentation => 10,
        }
    }

    fn classify(title: &str) -> Option<Self> {
        let lower = title.to_lowercase();
        for kw in ["plan", "design", "research", "architect"] {
            if lower.contains(kw) {
                return Some(Self::Planning);
            }
        }
        for kw in ["test", "qa", "verify", "validate"] {
            if lower.contains(kw) {
                return Some(Self::Testing);
            }
        }
        for kw in ["document", "docs", "readme", "guide"] {
            if lower.contains(kw) {
                return Some(Self::Documentation);
            }
        }
        for kw in [
            "implement", "build", "develop", "create", "integrate", "code", "fix", "refactor",
            "deploy", "migrate",
        ] {
            if lower.contains(kw) {
                return Some(Self::Implementation);
            }
        }
        None
    }
}

/// Parse a `### Task ...` header, returning the cleaned title.
fn parse_task_header(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();
    if !lower.starts_with("### task") {
        return None;
    }
    let rest = &trimmed["### task".len()..];
    let title = rest
        .trim_start_matches(|c: char| {
            c.is_ascii_digit() || matches!(c, '.' | ':' | ')' | '-' | ' ')
        })
        .trim();
    Some(title.to_string())
}

fn is_section_break(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("## ") || parse_task_header(trimmed).is_some()
}

fn title_is_task(title: &str) -> bool {
    let lower = title.to_lowercase();
    if NON_TASK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    TASK_VERBS.iter().any(|v| lower.contains(v)) || title.chars().count() >= 6
}

/// Skills for a task title, from the fixed keyword table.
fn skills_for_title(title: &str) -> Vec<String> {
    let lower = title.to_lowercase();
    let mut out: Vec<String> = Vec::new();
    for (kw, skills) in SKILL_TABLE {
        if lower.contains(kw) {
            for s in skills {
                if !out.iter().any(|existing| existing == s) {
                    out.push((*s).to_string());
                }
            }
        }
    }
    if out.is_empty() {
        out.push("general".to_string());
    }
    out
}

struct DraftTask {
    title: String,
    description: String,
    category: Option<BudgetCategory>,
}

fn extract_drafts(description_md: &str) -> Vec<DraftTask> {
    let lines: Vec<&str> = description_md.lines().collect();
    let mut drafts = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(title) = parse_task_header(lines[i]) else {
            i += 1;
            continue;
        };
        let mut body = Vec::new();
        let mut j = i + 1;
        while j < lines.len() && !is_section_break(lines[j]) {
            if !lines[j].trim_start().starts_with('#') {
                body.push(lines[j].trim());
            }
            j += 1;
        }
        if !title.is_empty() && title_is_task(&title) {
            drafts.push(DraftTask {
                category: BudgetCategory::classify(&title),
                description: body.join("\n").trim().to_string(),
                title,
            });
        }
        i = j;
    }
    drafts
}

/// Split the proposal budget across drafts.
///
/// Categorized drafts share their category's allocation (planning 20%,
/// implementation 50%, testing 20%, documentation 10%); drafts matching no
/// category budget as implementation work. When nothing matches any
/// category the budget splits equally. The returned sum never exceeds
/// `total_budget_sats`.
fn assign_budgets(drafts: &[DraftTask], total_budget_sats: u64) -> Vec<u64> {
    if drafts.is_empty() {
        return vec![];
    }
    if drafts.iter().all(|d| d.category.is_none()) {
        let share = total_budget_sats / drafts.len() as u64;
        return vec![share; drafts.len()];
    }
    let mut counts = std::collections::HashMap::new();
    for draft in drafts {
        let cat = draft.category.unwrap_or(BudgetCategory::Implementation);
        *counts.entry(cat).or_insert(0u64) += 1;
    }
    drafts
        .iter()
        .map(|d| {
            let cat = d.category.unwrap_or(BudgetCategory::Implementation);
            let cat_total = total_budget_sats * cat.pct() / 100;
            cat_total / counts[&cat]
        })
        .collect()
}

/// Derive structured tasks from a proposal description.
///
/// Returns at least one task: when no headers survive extraction the whole
/// budget goes to a single comprehensive-implementation task.
pub fn derive_tasks(
    proposal_id: &str,
    contract_id: &str,
    description_md: &str,
    total_budget_sats: u64,
    now: DateTime<Utc>,
) -> Vec<Task> {
    let drafts = extract_drafts(description_md);

    let make_task = |n: usize, title: String, description: String, budget: u64| Task {
        task_id: format!("{proposal_id}-task-{n}"),
        contract_id: contract_id.to_string(),
        goal_id: format!("{proposal_id}-goal-{n}"),
        skills: skills_for_title(&title),
        title,
        description,
        budget_sats: budget,
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
    };

    if drafts.is_empty() {
        return vec![make_task(
            1,
            "Comprehensive Implementation".to_string(),
            description_md.trim().to_string(),
            total_budget_sats,
        )];
    }

    let budgets = assign_budgets(&drafts, total_budget_sats);
    drafts
        .into_iter()
        .zip(budgets)
        .enumerate()
        .map(|(idx, (draft, budget))| {
            make_task(idx + 1, draft.title, draft.description, budget)
        })
        .collect()
}
