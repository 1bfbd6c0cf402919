//! Contract identity and wallet validation.
//!
//! A contract is identified by the SHA-256 pixel hash of its wish image, but
//! the identifier travels in three interchangeable forms (`<hash>`,
//! `wish-<hash>`, a bare id). All reads and selection queries compare the
//! normalized form.

use serde_json::{Map, Value};

use crate::error::{CoordinatorError, Result};
use crate::models::metadata_keys;

const STRIP_PREFIXES: [&str; 3] = ["wish-", "proposal-", "task-"];

/// Canonicalize a contract identifier: trim surrounding whitespace and strip
/// at most one leading `wish-` / `proposal-` / `task-` prefix.
pub fn normalize_contract_id(raw: &str) -> String {
    let trimmed = raw.trim();
    for prefix in STRIP_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    trimmed.to_string()
}

/// Derive the contract identifier for a proposal from its metadata.
///
/// Priority is fixed: `visible_pixel_hash`, then `contract_id`, then
/// `ingestion_id`, then the proposal's own id. Whitespace-only values are
/// skipped.
pub fn contract_id_from_meta(metadata: &Map<String, Value>, proposal_id: &str) -> String {
    for key in [
        metadata_keys::VISIBLE_PIXEL_HASH,
        metadata_keys::CONTRACT_ID,
        metadata_keys::INGESTION_ID,
    ] {
        if let Some(value) = metadata.get(key).and_then(Value::as_str) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    proposal_id.trim().to_string()
}

/// Derive the contract identifier for a full proposal.
///
/// Same priority as [`contract_id_from_meta`], with the proposal's own
/// `visible_pixel_hash` field standing in when the metadata key is absent;
/// the image pipeline writes the hash on the proposal itself.
pub fn contract_id_for_proposal(proposal: &crate::models::Proposal) -> String {
    let meta_hash = proposal
        .metadata
        .get(metadata_keys::VISIBLE_PIXEL_HASH)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if meta_hash.is_none() {
        let field_hash = proposal.visible_pixel_hash.trim();
        if !field_hash.is_empty() {
            return field_hash.to_string();
        }
    }
    contract_id_from_meta(&proposal.metadata, &proposal.id)
}

/// True for a 64-character lower-hex string (SHA-256).
pub fn is_valid_pixel_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// API keys share the pixel-hash format: 64-character lower-hex.
pub fn is_valid_api_key(s: &str) -> bool {
    is_valid_pixel_hash(s)
}

fn is_base58_char(c: char) -> bool {
    c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l')
}

fn is_bech32_char(c: char) -> bool {
    matches!(c, '0' | '2'..='9' | 'a' | 'c'..='h' | 'j'..='n' | 'p'..='z')
}

/// Share of the single most frequent character, in percent.
fn dominant_char_pct(s: &str) -> usize {
    let mut counts = std::collections::HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0usize) += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    if s.is_empty() {
        0
    } else {
        max * 100 / s.chars().count()
    }
}

fn looks_like_placeholder(addr: &str) -> bool {
    let lower = addr.to_lowercase();
    lower.contains("test") || lower.contains("example") || addr.contains("..")
        || dominant_char_pct(addr) > 50
}

/// Validate a bitcoin payout address.
///
/// Accepts legacy base58 (26-35 chars), Bech32 (`bc1`/`tb1`, 42-90 chars)
/// and Bech32m (`bc1p`/`tb1p`). Placeholder-looking addresses are rejected
/// even when well-formed.
pub fn is_valid_bitcoin_address(addr: &str) -> bool {
    if looks_like_placeholder(addr) {
        return false;
    }
    if addr.starts_with("bc1") || addr.starts_with("tb1") {
        let data = &addr[3..];
        return (42..=90).contains(&addr.len()) && data.chars().all(is_bech32_char);
    }
    (26..=35).contains(&addr.len()) && addr.chars().all(is_base58_char)
}

/// `VALIDATION`-typed wrapper used by the claim path.
pub fn validate_wallet(addr: &str) -> Result<()> {
    if addr.trim().is_empty() {
        return Err(CoordinatorError::Validation {
            field: "wallet".to_string(),
            reason: "wallet address is required".to_string(),
        });
    }
    if !is_valid_bitcoin_address(addr) {
        return Err(CoordinatorError::Validation {
            field: "wallet".to_string(),
            reason: "not a recognized bitcoin address format".to_string(),
        });
    }
    Ok(())
}
