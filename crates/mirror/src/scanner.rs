//! Uploads-directory scanner and shared mirror state.
//!
//! Files are fingerprinted by `(size, mtime)`; a file whose fingerprint
//! matches the previous scan is not re-added to IPFS. Dotfiles are skipped
//! (in-flight downloads are written as dot-prefixed tempfiles), symlinks are
//! not followed, and a scan stops after `max_files` entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Instant, UNIX_EPOCH};

use tracing::warn;

use crate::error::Result;

/// A file the mirror has accounted for, local or downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownFile {
    pub size: u64,
    pub mod_time: i64,
    pub cid: String,
}

impl KnownFile {
    /// Fingerprint match against a scanned file.
    pub fn matches(&self, size: u64, mod_time: i64) -> bool {
        self.size == size && self.mod_time == mod_time
    }
}

#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Uploads-relative path, forward slashes.
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    pub mod_time: i64,
}

fn mod_time_unix(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn scan_into(
    root: &Path,
    dir: &Path,
    max_files: usize,
    out: &mut Vec<ScannedFile>,
) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        if out.len() >= max_files {
            return Ok(());
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Skipping unreadable entry {}: {}", path.display(), e);
                continue;
            }
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        if meta.is_dir() {
            scan_into(root, &path, max_files, out)?;
            continue;
        }
        let rel_path = match crate::paths::relative_to_uploads(root, &path) {
            Some(rel) => rel,
            None => continue,
        };
        out.push(ScannedFile {
            rel_path,
            abs_path: path,
            size: meta.len(),
            mod_time: mod_time_unix(&meta),
        });
    }
    Ok(())
}

/// Walk the uploads directory. A missing directory scans as empty.
pub fn scan_dir(root: &Path, max_files: usize) -> Result<Vec<ScannedFile>> {
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }
    scan_into(root, root, max_files, &mut out)?;
    Ok(out)
}

/// State shared between the publisher and subscriber loops. The two tasks
/// are otherwise independent; this map is their only coupling.
#[derive(Default)]
pub struct SyncState {
    known_files: Mutex<HashMap<String, KnownFile>>,
    last_published: Mutex<Option<String>>,
    last_publish_at: Mutex<Option<Instant>>,
    last_seen_remote: Mutex<Option<String>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_snapshot(&self) -> HashMap<String, KnownFile> {
        self.known_files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn record_known(&self, rel_path: &str, file: KnownFile) {
        self.known_files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rel_path.to_string(), file);
    }

    pub fn remove_known(&self, rel_path: &str) -> Option<KnownFile> {
        self.known_files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(rel_path)
    }

    /// Drop entries for files no longer present on disk.
    pub fn retain_known<F: Fn(&str) -> bool>(&self, keep: F) {
        self.known_files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|path, _| keep(path));
    }

    pub fn last_published(&self) -> Option<String> {
        self.last_published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn mark_published(&self, cid: &str) {
        *self
            .last_published
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(cid.to_string());
        *self
            .last_publish_at
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    pub fn publish_due(&self, interval: std::time::Duration) -> bool {
        self.last_publish_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map_or(true, |at| at.elapsed() >= interval)
    }

    pub fn last_seen_remote(&self) -> Option<String> {
        self.last_seen_remote
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn mark_seen_remote(&self, cid: &str) {
        *self
            .last_seen_remote
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(cid.to_string());
    }
}
