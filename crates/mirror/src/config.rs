use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Master switch (env: `IPFS_MIRROR_ENABLED`).
    #[serde(default)]
    pub ipfs_mirror_enabled: bool,

    /// Publisher loop switch (env: `IPFS_MIRROR_UPLOAD_ENABLED`).
    #[serde(default = "default_true")]
    pub ipfs_mirror_upload_enabled: bool,

    /// Subscriber loop switch (env: `IPFS_MIRROR_DOWNLOAD_ENABLED`).
    #[serde(default = "default_true")]
    pub ipfs_mirror_download_enabled: bool,

    /// Kubo RPC endpoint (env: `IPFS_API_URL`).
    #[serde(default = "default_api_url")]
    pub ipfs_api_url: String,

    /// Pubsub topic (env: `IPFS_MIRROR_TOPIC`).
    #[serde(default = "default_topic")]
    pub ipfs_mirror_topic: String,

    /// Directory holding uploaded artifacts (env: `UPLOADS_DIR`).
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,

    /// Filesystem rescan period in seconds
    /// (env: `IPFS_MIRROR_POLL_INTERVAL_SEC`).
    #[serde(default = "default_poll_interval_sec")]
    pub ipfs_mirror_poll_interval_sec: u64,

    /// Unconditional republish period in seconds
    /// (env: `IPFS_MIRROR_PUBLISH_INTERVAL_SEC`).
    #[serde(default = "default_publish_interval_sec")]
    pub ipfs_mirror_publish_interval_sec: u64,

    /// Cap on files per scan (env: `IPFS_MIRROR_MAX_FILES`).
    #[serde(default = "default_max_files")]
    pub ipfs_mirror_max_files: usize,

    /// Timeout for short IPFS API calls in seconds
    /// (env: `IPFS_HTTP_TIMEOUT_SEC`). The pubsub subscribe stream is
    /// never timed out.
    #[serde(default = "default_http_timeout_sec")]
    pub ipfs_http_timeout_sec: u64,

    #[serde(default = "default_manifest_version")]
    pub manifest_version: u32,

    #[serde(default = "default_manifest_filename")]
    pub manifest_filename: String,

    /// `type` field of the pubsub announcement.
    #[serde(default = "default_topic")]
    pub announcement_label: String,
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    "http://127.0.0.1:5001".to_string()
}

fn default_topic() -> String {
    "stargate-uploads".to_string()
}

fn default_uploads_dir() -> String {
    "/data/uploads".to_string()
}

fn default_poll_interval_sec() -> u64 {
    10
}

fn default_publish_interval_sec() -> u64 {
    30
}

fn default_max_files() -> usize {
    2000
}

fn default_http_timeout_sec() -> u64 {
    30
}

fn default_manifest_version() -> u32 {
    1
}

fn default_manifest_filename() -> String {
    "stargate-uploads-manifest.json".to_string()
}

impl MirrorConfig {
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        cfg.try_deserialize()
    }

    /// Convenience constructor from environment variables.
    pub fn from_env() -> std::result::Result<Self, config::ConfigError> {
        Self::load()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.ipfs_mirror_poll_interval_sec)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.ipfs_mirror_publish_interval_sec)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.ipfs_http_timeout_sec)
    }
}
