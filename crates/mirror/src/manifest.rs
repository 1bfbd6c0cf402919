//! Manifest and announcement wire formats.
//!
//! The manifest encoding is deterministic: fixed field order (struct order),
//! `files` sorted ascending by path, no trailing newline. Two publishers
//! with identical state produce byte-identical payloads, which keeps the
//! manifest CID stable and the pubsub traffic quiet.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Uploads-relative path with forward slashes.
    pub path: String,
    /// CIDv1 of the pinned file content.
    pub cid: String,
    pub size: i64,
    /// Unix seconds.
    pub mod_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Peer id of the publishing instance.
    pub origin: String,
    /// Unix seconds.
    pub created_at: i64,
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(version: u32, origin: &str, created_at: i64, mut files: Vec<ManifestEntry>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            version,
            origin: origin.to_string(),
            created_at,
            files,
        }
    }

    /// Canonical JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Pubsub announcement pointing at a freshly published manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub manifest_cid: String,
    #[serde(default)]
    pub origin: String,
    /// Unix seconds.
    #[serde(default)]
    pub timestamp: i64,
}

/// Multibase form carried on the pubsub wire: `u` + unpadded base64url.
pub fn multibase_encode(bytes: &[u8]) -> String {
    format!("u{}", URL_SAFE_NO_PAD.encode(bytes))
}

fn decode_once(data: &[u8]) -> Vec<Vec<u8>> {
    let Ok(text) = std::str::from_utf8(data) else {
        return Vec::new();
    };
    let text = text.trim();
    let mut candidates = Vec::new();
    if let Some(rest) = text.strip_prefix('u') {
        if let Ok(decoded) = URL_SAFE_NO_PAD.decode(rest) {
            candidates.push(decoded);
        }
    }
    if let Ok(decoded) = STANDARD.decode(text) {
        candidates.push(decoded);
    }
    if let Ok(decoded) = URL_SAFE_NO_PAD.decode(text) {
        candidates.push(decoded);
    }
    if let Ok(decoded) = URL_SAFE.decode(text) {
        candidates.push(decoded);
    }
    candidates
}

/// Decode an announcement from a pubsub payload.
///
/// Daemons differ in how they hand the payload over: raw JSON, multibase
/// `u<base64url>`, plain base64, raw-url base64, and one level of nesting
/// (multibase inside base64) are all tried; the first candidate that parses
/// with a non-empty `manifest_cid` wins.
pub fn decode_announcement(data: &[u8]) -> Option<Announcement> {
    let mut candidates = vec![data.to_vec()];
    for first in decode_once(data) {
        candidates.extend(decode_once(&first));
        candidates.push(first);
    }
    for candidate in candidates {
        if let Ok(announcement) = serde_json::from_slice::<Announcement>(&candidate) {
            if !announcement.manifest_cid.is_empty() {
                return Some(announcement);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<ManifestEntry> {
        vec![
            ManifestEntry {
                path: "zeta.txt".to_string(),
                cid: "bafy-zeta".to_string(),
                size: 3,
                mod_time: 30,
            },
            ManifestEntry {
                path: "alpha.txt".to_string(),
                cid: "bafy-alpha".to_string(),
                size: 1,
                mod_time: 10,
            },
        ]
    }

    fn sample_announcement() -> Announcement {
        Announcement {
            kind: "stargate-uploads".to_string(),
            manifest_cid: "bafy-manifest".to_string(),
            origin: "12D3KooWpeer".to_string(),
            timestamp: 1700000000,
        }
    }

    // -----------------------------------------------------------------------
    // Manifest determinism
    // -----------------------------------------------------------------------

    #[test]
    fn test_entries_sorted_by_path() {
        let manifest = Manifest::new(1, "peer", 100, sample_entries());
        assert_eq!(manifest.files[0].path, "alpha.txt");
        assert_eq!(manifest.files[1].path, "zeta.txt");
    }

    #[test]
    fn test_identical_state_encodes_identically() {
        let a = Manifest::new(1, "peer", 100, sample_entries()).encode().unwrap();
        let b = Manifest::new(1, "peer", 100, sample_entries()).encode().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_field_order_and_no_trailing_newline() {
        let bytes = Manifest::new(1, "peer", 100, vec![]).encode().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "{\"version\":1,\"origin\":\"peer\",\"created_at\":100,\"files\":[]}"
        );
    }

    #[test]
    fn test_manifest_round_trip() {
        let manifest = Manifest::new(1, "peer", 100, sample_entries());
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
    }

    // -----------------------------------------------------------------------
    // Announcement decode chain
    // -----------------------------------------------------------------------

    #[test]
    fn test_decode_raw_json() {
        let raw = serde_json::to_vec(&sample_announcement()).unwrap();
        assert_eq!(decode_announcement(&raw), Some(sample_announcement()));
    }

    #[test]
    fn test_decode_multibase() {
        let raw = serde_json::to_vec(&sample_announcement()).unwrap();
        let wire = multibase_encode(&raw);
        assert_eq!(
            decode_announcement(wire.as_bytes()),
            Some(sample_announcement())
        );
    }

    #[test]
    fn test_decode_standard_base64() {
        let raw = serde_json::to_vec(&sample_announcement()).unwrap();
        let wire = STANDARD.encode(&raw);
        assert_eq!(
            decode_announcement(wire.as_bytes()),
            Some(sample_announcement())
        );
    }

    #[test]
    fn test_decode_nested_multibase_inside_base64() {
        let raw = serde_json::to_vec(&sample_announcement()).unwrap();
        let inner = multibase_encode(&raw);
        let wire = STANDARD.encode(inner.as_bytes());
        assert_eq!(
            decode_announcement(wire.as_bytes()),
            Some(sample_announcement())
        );
    }

    #[test]
    fn test_decode_rejects_empty_manifest_cid() {
        let mut announcement = sample_announcement();
        announcement.manifest_cid = String::new();
        let raw = serde_json::to_vec(&announcement).unwrap();
        assert_eq!(decode_announcement(&raw), None);
    }

    #[test]
    fn test_decode_garbage_is_none() {
        assert_eq!(decode_announcement(b"not json at all"), None);
        assert_eq!(decode_announcement(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_announcement_wire_field_names() {
        let json = serde_json::to_string(&sample_announcement()).unwrap();
        assert!(json.contains("\"type\":\"stargate-uploads\""));
        assert!(json.contains("\"manifest_cid\":\"bafy-manifest\""));
    }
}
