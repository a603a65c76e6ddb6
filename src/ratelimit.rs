//! Per-credential rate limiting.
//!
//! Two limits apply to every authenticated request: the acl limit (per second,
//! keyed by credential id) and the ip limit (per hour, keyed by credential id
//! and remote address). Counting is delegated to a [`CounterStore`].

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::{GatewayError, Result};
use crate::identity::Identity;
use crate::metrics::GatewayMetrics;

pub const ACL_LIMIT_PERIOD: Duration = Duration::from_secs(1);
pub const IP_LIMIT_PERIOD: Duration = Duration::from_secs(3600);

/// Counter persistence. `consume` must be atomic with respect to the limit:
/// it returns `false` instead of exceeding `limit` within `period`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Remaining budget for `key` in the current window.
    async fn peek(&self, key: &str, limit: u64, period: Duration) -> Result<i64>;

    async fn consume(&self, key: &str, limit: u64, period: Duration) -> Result<bool>;
}

/// Sliding-log store kept in process memory.
#[derive(Default)]
pub struct MemoryCounterStore {
    logs: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(log: &mut VecDeque<Instant>, now: Instant, period: Duration) {
        while let Some(front) = log.front() {
            if now.duration_since(*front) >= period {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn peek(&self, key: &str, limit: u64, period: Duration) -> Result<i64> {
        let now = Instant::now();
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        let used = match logs.get_mut(key) {
            Some(log) => {
                Self::prune(log, now, period);
                log.len()
            }
            None => 0,
        };
        Ok(limit as i64 - used as i64)
    }

    async fn consume(&self, key: &str, limit: u64, period: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        let log = logs.entry(key.to_string()).or_default();
        Self::prune(log, now, period);
        if log.len() as u64 >= limit {
            return Ok(false);
        }
        log.push_back(now);
        Ok(true)
    }
}

/// One lazily created limiter; its rate can change in place.
#[derive(Debug)]
pub struct Limiter {
    key: String,
    rate: AtomicU64,
    period: Duration,
}

impl Limiter {
    pub fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limiters: DashMap<String, Arc<Limiter>>,
    metrics: Option<GatewayMetrics>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            limiters: DashMap::new(),
            metrics: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()))
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch or create the limiter for `key`, updating its rate if it changed.
    pub fn limiter(&self, key: &str, rate: u64, period: Duration) -> Arc<Limiter> {
        let limiter = self
            .limiters
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Limiter {
                    key: key.to_string(),
                    rate: AtomicU64::new(rate),
                    period,
                })
            })
            .clone();
        if limiter.rate() != rate {
            limiter.rate.store(rate, Ordering::Relaxed);
        }
        limiter
    }

    /// Peek, refuse when exhausted, otherwise consume one unit.
    pub async fn take(&self, limiter: &Limiter, label: &str) -> Result<()> {
        let rate = limiter.rate();
        let remaining = self.store.peek(&limiter.key, rate, limiter.period).await?;
        if remaining <= 0 || !self.store.consume(&limiter.key, rate, limiter.period).await? {
            if let Some(metrics) = &self.metrics {
                metrics.rate_limited.with_label_values(&[label]).inc();
            }
            return Err(GatewayError::RateLimited(format!(
                "rate limit exceeded: {} requests per {}",
                rate,
                describe_period(limiter.period)
            )));
        }
        Ok(())
    }

    /// Apply the identity's acl and ip limits. Zero disables a limit.
    pub async fn check(&self, identity: &Identity, remote: Option<IpAddr>) -> Result<()> {
        let grants = identity.grants();
        if grants.acl_limit > 0 {
            let limiter = self.limiter(
                &format!("acl:{}", identity.id()),
                grants.acl_limit,
                ACL_LIMIT_PERIOD,
            );
            self.take(&limiter, "acl").await?;
        }
        if grants.ip_limit > 0 {
            let ip = remote
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let limiter = self.limiter(
                &format!("ip:{}:{}", identity.id(), ip),
                grants.ip_limit,
                IP_LIMIT_PERIOD,
            );
            self.take(&limiter, "ip").await?;
        }
        Ok(())
    }
}

fn describe_period(period: Duration) -> &'static str {
    if period >= IP_LIMIT_PERIOD {
        "hour"
    } else {
        "second"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Grants, User};

    fn identity(acl_limit: u64, ip_limit: u64) -> Identity {
        let mut grants = Grants::unrestricted();
        grants.acl_limit = acl_limit;
        grants.ip_limit = ip_limit;
        Identity::User(User {
            username: "k".into(),
            password: "p".into(),
            is_admin: false,
            email: None,
            grants,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_acl_limit_window() {
        let limiter = RateLimiter::in_memory();
        let id = identity(5, 0);
        for _ in 0..5 {
            limiter.check(&id, None).await.unwrap();
        }
        let err = limiter.check(&id, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited(_)));

        tokio::time::advance(Duration::from_millis(1001)).await;
        limiter.check(&id, None).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_limit_is_per_address() {
        let limiter = RateLimiter::in_memory();
        let id = identity(0, 2);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        limiter.check(&id, Some(a)).await.unwrap();
        limiter.check(&id, Some(a)).await.unwrap();
        assert!(limiter.check(&id, Some(a)).await.is_err());
        limiter.check(&id, Some(b)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_updated_in_place() {
        let limiter = RateLimiter::in_memory();
        let first = limiter.limiter("acl:k", 5, ACL_LIMIT_PERIOD);
        let second = limiter.limiter("acl:k", 9, ACL_LIMIT_PERIOD);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.rate(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_more_than_limit_per_window() {
        let store = MemoryCounterStore::new();
        let mut granted = 0;
        for _ in 0..50 {
            if store.consume("k", 7, ACL_LIMIT_PERIOD).await.unwrap() {
                granted += 1;
            }
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        // 50 calls over 500ms all land in one window
        assert_eq!(granted, 7);
    }
}
