//! Publisher loop: reconcile local uploads into IPFS and announce manifests.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::error::Result;
use crate::ipfs::IpfsApi;
use crate::manifest::{multibase_encode, Announcement, Manifest, ManifestEntry};
use crate::paths::relative_to_uploads;
use crate::scanner::{scan_dir, KnownFile, SyncState};

pub struct Publisher {
    config: MirrorConfig,
    ipfs: Arc<dyn IpfsApi>,
    state: Arc<SyncState>,
    origin: String,
}

impl Publisher {
    pub fn new(
        config: MirrorConfig,
        ipfs: Arc<dyn IpfsApi>,
        state: Arc<SyncState>,
        origin: String,
    ) -> Self {
        Self {
            config,
            ipfs,
            state,
            origin,
        }
    }

    /// Poll until shutdown. Errors are logged and the next tick retries.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            "Publisher started for {} (poll {}s, publish {}s)",
            self.config.uploads_dir,
            self.config.ipfs_mirror_poll_interval_sec,
            self.config.ipfs_mirror_publish_interval_sec
        );
        let mut interval = tokio::time::interval(self.config.poll_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sync_once().await {
                        warn!("Publisher pass failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Publisher stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One reconcile pass. Returns the announced manifest CID, if any.
    pub async fn sync_once(&self) -> Result<Option<String>> {
        let uploads_dir = Path::new(&self.config.uploads_dir);
        let scanned = scan_dir(uploads_dir, self.config.ipfs_mirror_max_files)?;

        let mut changed = false;
        let known = self.state.known_snapshot();
        for file in &scanned {
            if let Some(existing) = known.get(&file.rel_path) {
                if existing.matches(file.size, file.mod_time) {
                    continue;
                }
            }
            let bytes = tokio::fs::read(&file.abs_path).await?;
            let cid = self.ipfs.add(&file.rel_path, bytes).await?;
            debug!("Added {} as {}", file.rel_path, cid);
            self.state.record_known(
                &file.rel_path,
                KnownFile {
                    size: file.size,
                    mod_time: file.mod_time,
                    cid,
                },
            );
            changed = true;
        }
        // Entries whose file vanished drop out of the manifest.
        let present: std::collections::HashSet<String> =
            scanned.iter().map(|f| f.rel_path.clone()).collect();
        let before = self.state.known_snapshot().len();
        self.state.retain_known(|path| present.contains(path));
        if self.state.known_snapshot().len() != before {
            changed = true;
        }

        if !changed && !self.state.publish_due(self.config.publish_interval()) {
            return Ok(None);
        }
        self.publish_manifest().await
    }

    /// Build, add and (when the CID moved) announce the manifest.
    async fn publish_manifest(&self) -> Result<Option<String>> {
        let entries: Vec<ManifestEntry> = self
            .state
            .known_snapshot()
            .into_iter()
            .map(|(path, file)| ManifestEntry {
                path,
                cid: file.cid,
                size: file.size as i64,
                mod_time: file.mod_time,
            })
            .collect();
        let manifest = Manifest::new(
            self.config.manifest_version,
            &self.origin,
            Utc::now().timestamp(),
            entries,
        );
        let payload = manifest.encode()?;
        let manifest_cid = self
            .ipfs
            .add(&self.config.manifest_filename, payload)
            .await?;

        if self.state.last_published().as_deref() == Some(manifest_cid.as_str()) {
            self.state.mark_published(&manifest_cid);
            return Ok(None);
        }
        let announcement = Announcement {
            kind: self.config.announcement_label.clone(),
            manifest_cid: manifest_cid.clone(),
            origin: self.origin.clone(),
            timestamp: Utc::now().timestamp(),
        };
        let wire = multibase_encode(&serde_json::to_vec(&announcement)?);
        self.ipfs
            .pubsub_pub(&self.config.ipfs_mirror_topic, wire.as_bytes())
            .await?;
        self.state.mark_published(&manifest_cid);
        info!(
            "Announced manifest {} ({} files)",
            manifest_cid,
            manifest.files.len()
        );
        Ok(Some(manifest_cid))
    }

    /// Forget an uploaded file and unpin its content. Unknown paths are
    /// no-ops.
    pub async fn unpin_path(&self, absolute: &Path) -> Result<()> {
        let uploads_dir = Path::new(&self.config.uploads_dir);
        let Some(rel_path) = relative_to_uploads(uploads_dir, absolute) else {
            return Ok(());
        };
        let Some(known) = self.state.remove_known(&rel_path) else {
            return Ok(());
        };
        info!("Unpinning {} ({})", rel_path, known.cid);
        self.ipfs.pin_rm(&known.cid).await
    }
}
