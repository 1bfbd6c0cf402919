//! Per-client rate limiting and IP suspicion tracking.
//!
//! Each client gets a token bucket (capacity 100, refill 10/s, cost 1 per
//! request), created full on first use. IPs marked suspicious more than five
//! times inside the rolling window are blocked for an hour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Bucket capacity (also the initial fill).
    pub capacity: f64,
    /// Tokens restored per second.
    pub refill_per_sec: f64,
    /// Tokens consumed per request.
    pub cost: f64,
    /// Suspicion marks tolerated inside the rolling window.
    pub max_suspicion_marks: usize,
    /// Rolling window for suspicion marks, and the block duration.
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_per_sec: 10.0,
            cost: 1.0,
            max_suspicion_marks: 5,
            block_duration: Duration::from_secs(3600),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Default)]
struct IpRecord {
    marks: Vec<Instant>,
    blocked_until: Option<Instant>,
}

struct LimiterState {
    buckets: HashMap<String, Bucket>,
    ips: HashMap<String, IpRecord>,
}

#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState {
                buckets: HashMap::new(),
                ips: HashMap::new(),
            })),
            config,
        }
    }

    /// Spend one request's worth of tokens. Returns false when the bucket
    /// is empty.
    pub async fn allow(&self, client_id: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let bucket = state.buckets.entry(client_id.to_string()).or_insert(Bucket {
            tokens: self.config.capacity,
            last_refill: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        bucket.last_refill = now;
        if bucket.tokens >= self.config.cost {
            bucket.tokens -= self.config.cost;
            true
        } else {
            false
        }
    }

    /// Record a suspicion mark against an IP; blocks it once the rolling
    /// count passes the threshold.
    pub async fn mark_suspicious(&self, ip: &str) {
        let now = Instant::now();
        let window = self.config.block_duration;
        let max_marks = self.config.max_suspicion_marks;
        let block = self.config.block_duration;
        let mut state = self.state.lock().await;
        let record = state.ips.entry(ip.to_string()).or_default();
        record.marks.retain(|mark| now.duration_since(*mark) <= window);
        record.marks.push(now);
        if record.marks.len() > max_marks {
            record.blocked_until = Some(now + block);
            warn!("Blocking suspicious ip for {}s", block.as_secs());
        }
    }

    /// True while the IP is inside a block window.
    pub async fn is_blocked(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.ips.get_mut(ip) {
            Some(record) => match record.blocked_until {
                Some(until) if now < until => true,
                Some(_) => {
                    record.blocked_until = None;
                    false
                }
                None => false,
            },
            None => false,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
