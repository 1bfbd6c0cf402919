use serde::Deserialize;

use crate::store::StoreDefaults;

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Postgres connection string (env: `DATABASE_URL`). Absent means the
    /// in-memory backend.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Budget applied to proposals that arrive without one
    /// (env: `MCP_DEFAULT_BUDGET_SATS`).
    #[serde(default = "default_budget_sats")]
    pub mcp_default_budget_sats: u64,

    /// Funding address advertised for new contracts
    /// (env: `MCP_DEFAULT_FUNDING_ADDRESS`).
    #[serde(default)]
    pub mcp_default_funding_address: String,

    /// Claim lease length in seconds (env: `MCP_CLAIM_TTL_SEC`).
    #[serde(default = "default_claim_ttl_sec")]
    pub mcp_claim_ttl_sec: u64,

    /// Contract-list cache TTL in seconds (env: `MCP_CACHE_TTL_SEC`).
    #[serde(default = "default_cache_ttl_sec")]
    pub mcp_cache_ttl_sec: u64,

    /// Contract-list cache size cap (env: `MCP_CACHE_MAX_ENTRIES`).
    #[serde(default = "default_cache_max_entries")]
    pub mcp_cache_max_entries: usize,

    /// Maximum number of connections in the pool (env: `DB_MAX_CONNECTIONS`).
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    /// Minimum number of idle connections maintained in the pool
    /// (env: `DB_MIN_CONNECTIONS`).
    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,

    /// Timeout in seconds to wait for a connection from the pool
    /// (env: `DB_CONNECTION_TIMEOUT`).
    #[serde(default = "default_connection_timeout_secs")]
    pub db_connection_timeout: u64,
}

fn default_budget_sats() -> u64 {
    100_000
}

fn default_claim_ttl_sec() -> u64 {
    3600
}

fn default_cache_ttl_sec() -> u64 {
    30
}

fn default_cache_max_entries() -> usize {
    256
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connection_timeout_secs() -> u64 {
    30
}

impl CoordinatorConfig {
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

    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.mcp_claim_ttl_sec as i64)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.mcp_cache_ttl_sec)
    }

    pub fn store_defaults(&self) -> StoreDefaults {
        StoreDefaults {
            budget_sats: self.mcp_default_budget_sats,
            claim_ttl: self.claim_ttl(),
        }
    }
}
