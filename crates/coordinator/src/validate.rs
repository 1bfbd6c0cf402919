//! Adversarial input validation for proposals.
//!
//! Proposals arrive from untrusted agents. Validation caps metadata size and
//! nesting, rejects script/traversal/control-character payloads in every
//! string field, and enforces identity coherence between the competing
//! contract-identity keys. Error messages name the failing field and never
//! echo the offending payload.

use serde_json::{Map, Value};

use crate::error::{CoordinatorError, Result};
use crate::identity::{is_valid_pixel_hash, normalize_contract_id};
use crate::models::{metadata_keys, Proposal, ProposalStatus};

/// Serialized metadata cap: 1 MiB.
pub const MAX_METADATA_BYTES: usize = 1024 * 1024;

/// Maximum JSON nesting depth for metadata, direct or embedded in strings.
pub const MAX_METADATA_DEPTH: usize = 10;

fn validation(field: &str, reason: &str) -> CoordinatorError {
    CoordinatorError::Validation {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Reject script tags, path-traversal tokens, raw control characters and
/// Unicode bidi overrides in a validated string field.
pub fn check_string_field(field: &str, value: &str) -> Result<()> {
    let lower = value.to_lowercase();
    if lower.contains("<script") || lower.contains("</script") {
        return Err(validation(field, "contains a script tag"));
    }
    if value.contains("..") || lower.contains("%2e%2e") {
        return Err(validation(field, "contains a path traversal token"));
    }
    for c in value.chars() {
        if c.is_control() && !matches!(c, '\t' | '\n' | '\r') {
            return Err(validation(field, "contains a control character"));
        }
        if matches!(c, '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}') {
            return Err(validation(field, "contains a bidi override codepoint"));
        }
    }
    Ok(())
}

/// Nesting depth of a JSON value. Scalars contribute nothing; each object or
/// array level counts once.
pub fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Walk every string value in the metadata tree, applying the character
/// checks and bounding the depth of JSON smuggled inside string values.
fn check_metadata_values(field: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => {
            check_string_field(field, s)?;
            let trimmed = s.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                if let Ok(embedded) = serde_json::from_str::<Value>(s) {
                    if json_depth(&embedded) > MAX_METADATA_DEPTH {
                        return Err(validation(field, "embedded JSON nesting exceeds 10 levels"));
                    }
                }
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, nested) in map {
                check_metadata_values(&format!("{field}.{key}"), nested)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for nested in items {
                check_metadata_values(field, nested)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Parse a raw proposal status from an input payload.
///
/// Empty means `pending`. `confirmed` is not accepted as input; it is only
/// reachable through the on-chain confirmation feed.
pub fn parse_input_status(raw: &str) -> Result<ProposalStatus> {
    if raw.is_empty() {
        return Ok(ProposalStatus::Pending);
    }
    match ProposalStatus::parse(raw) {
        Some(ProposalStatus::Confirmed) | None => {
            Err(validation("status", "not an accepted proposal status"))
        }
        Some(status) => Ok(status),
    }
}

/// Size, depth and character-class checks for a metadata map.
///
/// Shared by proposal writes and the free-form metadata update.
pub fn validate_metadata(metadata: &Map<String, Value>) -> Result<()> {
    let metadata = Value::Object(metadata.clone());
    let serialized_len = serde_json::to_string(&metadata).map(|s| s.len()).unwrap_or(0);
    if serialized_len > MAX_METADATA_BYTES {
        return Err(validation("metadata", "serialized size exceeds 1 MiB"));
    }
    if json_depth(&metadata) > MAX_METADATA_DEPTH {
        return Err(validation("metadata", "nesting exceeds 10 levels"));
    }
    check_metadata_values("metadata", &metadata)
}

/// Validate a proposal before it is written.
pub fn validate_proposal(proposal: &Proposal) -> Result<()> {
    check_string_field("title", &proposal.title)?;
    check_string_field("description", &proposal.description_md)?;
    validate_metadata(&proposal.metadata)?;

    if proposal.status == ProposalStatus::Confirmed {
        return Err(validation("status", "not an accepted proposal status"));
    }

    let field_hash = proposal.visible_pixel_hash.trim();
    let meta_hash = proposal.meta_str(metadata_keys::VISIBLE_PIXEL_HASH);
    if !field_hash.is_empty() && !is_valid_pixel_hash(field_hash) {
        return Err(validation(
            "visible_pixel_hash",
            "expected 64 lowercase hex characters",
        ));
    }
    if let Some(h) = meta_hash {
        if !is_valid_pixel_hash(&normalize_contract_id(h)) {
            return Err(validation(
                "metadata.visible_pixel_hash",
                "expected 64 lowercase hex characters",
            ));
        }
    }

    let has_hash = !field_hash.is_empty() || meta_hash.is_some();
    let has_scan = proposal
        .metadata
        .get(metadata_keys::IMAGE_SCAN_DATA)
        .map_or(false, |v| !v.is_null());
    if !has_hash && !has_scan {
        return Err(validation(
            "visible_pixel_hash",
            "proposal carries neither a pixel hash nor image scan data",
        ));
    }

    // Identity coherence: when both keys are present they must agree under
    // normalization, otherwise the proposal is spoofing a foreign contract.
    if let (Some(meta_contract), Some(hash)) =
        (proposal.meta_str(metadata_keys::CONTRACT_ID), meta_hash)
    {
        if normalize_contract_id(meta_contract) != normalize_contract_id(hash) {
            return Err(validation(
                "metadata.contract_id",
                "does not match visible_pixel_hash",
            ));
        }
    }

    Ok(())
}
