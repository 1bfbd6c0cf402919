//! Contract-list response cache.
//!
//! One in-memory map keyed by an opaque request fingerprint (the serialized
//! filter). Entries expire at the TTL, the oldest entry is evicted past
//! `max_size`, and any mutation touching a contract drops every entry whose
//! cached list contains it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::models::Contract;

struct CacheEntry {
    contracts: Vec<Contract>,
    cached_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
}

#[derive(Clone)]
pub struct ContractListCache {
    inner: Arc<RwLock<CacheInner>>,
    ttl: Duration,
    max_size: usize,
}

impl ContractListCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheInner {
                entries: HashMap::new(),
            })),
            ttl,
            max_size,
        }
    }

    /// Cached list for the fingerprint, if fresh. Stale entries are dropped
    /// on the way out.
    pub fn get(&self, key: &str) -> Option<Vec<Contract>> {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match inner.entries.get(key) {
                Some(entry) if entry.cached_at.elapsed() <= self.ttl => {
                    return Some(entry.contracts.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.remove(key);
        None
    }

    pub fn set(&self, key: String, contracts: Vec<Contract>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.insert(
            key,
            CacheEntry {
                contracts,
                cached_at: Instant::now(),
            },
        );
        if inner.entries.len() > self.max_size {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
            }
        }
    }

    /// Drop a single fingerprint.
    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entries.remove(key);
    }

    /// Drop every entry whose cached list contains the contract.
    pub fn invalidate_by_contract(&self, contract_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let stale: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.contracts.iter().any(|c| c.contract_id == contract_id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            inner.entries.remove(&key);
        }
    }

    /// Drop expired entries; called by the cleanup task.
    pub fn purge_expired(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.cached_at.elapsed() <= self.ttl);
        let dropped = before - inner.entries.len();
        if dropped > 0 {
            debug!("Cache cleanup dropped {} expired entries", dropped);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Background cleanup at TTL/2 until the shutdown signal flips.
    pub fn spawn_cleanup(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let cache = self.clone();
        let period = self.ttl / 2;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(50)));
            loop {
                tokio::select! {
                    _ = interval.tick() => cache.purge_expired(),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContractStatus;
    use chrono::Utc;

    fn contract(id: &str) -> Contract {
        Contract {
            contract_id: id.to_string(),
            title: id.to_string(),
            total_budget_sats: 0,
            goals_count: 0,
            available_tasks_count: 0,
            status: ContractStatus::Active,
            skills: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_get_fresh_entry() {
        let cache = ContractListCache::new(Duration::from_secs(30), 8);
        cache.set("k".to_string(), vec![contract("a")]);
        let hit = cache.get("k").unwrap();
        assert_eq!(hit[0].contract_id, "a");
    }

    #[test]
    fn test_expired_entry_dropped_on_read() {
        let cache = ContractListCache::new(Duration::from_millis(0), 8);
        cache.set("k".to_string(), vec![contract("a")]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let cache = ContractListCache::new(Duration::from_secs(30), 2);
        cache.set("first".to_string(), vec![contract("a")]);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("second".to_string(), vec![contract("b")]);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("third".to_string(), vec![contract("c")]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("first").is_none());
        assert!(cache.get("third").is_some());
    }

    #[test]
    fn test_invalidate_by_contract() {
        let cache = ContractListCache::new(Duration::from_secs(30), 8);
        cache.set("with".to_string(), vec![contract("a"), contract("b")]);
        cache.set("without".to_string(), vec![contract("c")]);
        cache.invalidate_by_contract("a");
        assert!(cache.get("with").is_none());
        assert!(cache.get("without").is_some());
    }

    #[test]
    fn test_invalidate_single_key() {
        let cache = ContractListCache::new(Duration::from_secs(30), 8);
        cache.set("k".to_string(), vec![contract("a")]);
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_purge_expired() {
        let cache = ContractListCache::new(Duration::from_millis(0), 8);
        cache.set("k".to_string(), vec![contract("a")]);
        std::thread::sleep(Duration::from_millis(5));
        cache.purge_expired();
        assert!(cache.is_empty());
    }
}
