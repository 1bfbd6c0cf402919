//! Subscriber loop: receive manifest announcements and reconstitute files.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::ipfs::{IpfsApi, PubsubMessage};
use crate::manifest::{decode_announcement, Manifest, ManifestEntry};
use crate::paths::safe_join;
use crate::scanner::{KnownFile, SyncState};

/// Delay before re-subscribing after a stream failure.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(5);

pub struct Subscriber {
    config: MirrorConfig,
    ipfs: Arc<dyn IpfsApi>,
    state: Arc<SyncState>,
    own_peer_id: String,
}

impl Subscriber {
    pub fn new(
        config: MirrorConfig,
        ipfs: Arc<dyn IpfsApi>,
        state: Arc<SyncState>,
        own_peer_id: String,
    ) -> Self {
        Self {
            config,
            ipfs,
            state,
            own_peer_id,
        }
    }

    /// Subscribe until shutdown, restarting the stream with a fixed backoff.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            "Subscriber started on topic {} (peer {})",
            self.config.ipfs_mirror_topic, self.own_peer_id
        );
        loop {
            if *shutdown.borrow() {
                info!("Subscriber stopping");
                return;
            }
            tokio::select! {
                result = self.subscribe_once() => {
                    match result {
                        Ok(()) => warn!("Pubsub stream ended, re-subscribing"),
                        Err(e) => warn!("Pubsub subscription failed: {}", e),
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(RESUBSCRIBE_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn subscribe_once(&self) -> Result<()> {
        let mut stream = self.ipfs.pubsub_sub(&self.config.ipfs_mirror_topic).await?;
        while let Some(message) = stream.next().await {
            match message {
                Ok(message) => {
                    if let Err(e) = self.handle_message(message).await {
                        warn!("Failed to process announcement: {}", e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Process one pubsub message: drop own traffic, decode the
    /// announcement, fetch and apply its manifest.
    pub async fn handle_message(&self, message: PubsubMessage) -> Result<()> {
        if message.from == self.own_peer_id {
            return Ok(());
        }
        let Some(announcement) = decode_announcement(&message.data) else {
            debug!("Ignoring undecodable pubsub payload from {}", message.from);
            return Ok(());
        };
        if self.state.last_seen_remote().as_deref() == Some(announcement.manifest_cid.as_str()) {
            debug!("Manifest {} already applied", announcement.manifest_cid);
            return Ok(());
        }
        info!(
            "Fetching manifest {} announced by {}",
            announcement.manifest_cid, announcement.origin
        );
        let bytes = self.cat_all(&announcement.manifest_cid).await?;
        let manifest = Manifest::decode(&bytes)?;
        for entry in &manifest.files {
            if let Err(e) = self.apply_entry(entry).await {
                warn!("Skipping manifest entry: {}", e);
            }
        }
        self.state.mark_seen_remote(&announcement.manifest_cid);
        Ok(())
    }

    async fn cat_all(&self, cid: &str) -> Result<Vec<u8>> {
        let mut stream = self.ipfs.cat(cid).await?;
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend(chunk?);
        }
        Ok(out)
    }

    /// Download one manifest entry under a traversal-safe target path.
    async fn apply_entry(&self, entry: &ManifestEntry) -> Result<()> {
        let uploads_dir = Path::new(&self.config.uploads_dir);
        let target = safe_join(uploads_dir, &entry.path)?;

        if let Ok(meta) = tokio::fs::metadata(&target).await {
            if meta.len() as i64 == entry.size {
                debug!("{} already present with matching size", entry.path);
                return Ok(());
            }
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Sibling dot-tempfile: invisible to the scanner while in flight,
        // renamed over the target atomically once complete.
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| MirrorError::UnsafePath {
                path: entry.path.clone(),
            })?;
        let temp_path = target.with_file_name(format!(".{file_name}.tmp"));

        let mut stream = self.ipfs.cat(&entry.cid).await?;
        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(e);
                }
            };
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&temp_path, &target).await?;

        // Restore the manifest mtime so the publisher fingerprint matches.
        let mtime = UNIX_EPOCH + Duration::from_secs(entry.mod_time.max(0) as u64);
        set_mtime(&target, mtime)?;

        self.state.record_known(
            &entry.path,
            KnownFile {
                size: written,
                mod_time: entry.mod_time,
                cid: entry.cid.clone(),
            },
        );
        info!("Mirrored {} ({} bytes)", entry.path, written);
        Ok(())
    }
}

fn set_mtime(path: &Path, mtime: SystemTime) -> Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(mtime)?;
    Ok(())
}
