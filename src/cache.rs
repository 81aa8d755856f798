//! Read-through JSON cache with named TTL policies.
//!
//! Store failures never fail the caller: a broken cache degrades to a
//! direct load and the error is logged.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::KvStore;

/// Named expiry policies so call sites never hard-code seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlPolicy {
    /// Fast-moving lists, e.g. open tickets
    Short,
    /// Default for query results
    Medium,
    /// Slow-moving content, e.g. published events
    Long,
    /// Effectively static content
    Day,
}

impl TtlPolicy {
    pub fn ttl(self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(60),
            Self::Medium => Duration::from_secs(300),
            Self::Long => Duration::from_secs(3_600),
            Self::Day => Duration::from_secs(86_400),
        }
    }
}

/// Whether a read-through call was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn is_hit(self) -> bool {
        self == Self::Hit
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

pub struct Cache {
    store: Arc<dyn KvStore>,
    prefix: String,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl Cache {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// Cached value, or `None` on a miss or any store/decoding problem.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full = self.key(key);
        let raw = match self.store.get(&full).await {
            Ok(raw) => raw,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %full, error = %e, "cache read failed");
                return None;
            }
        };
        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %full, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store a value. Returns whether it was written.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, policy: TtlPolicy) -> bool {
        let full = self.key(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %full, error = %e, "cannot encode cache value");
                return false;
            }
        };
        match self.store.set(&full, &raw, Some(policy.ttl())).await {
            Ok(()) => true,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %full, error = %e, "cache write failed");
                false
            }
        }
    }

    /// Serve from cache, or run `load`, cache its result and return it.
    /// Loader errors are returned untouched and nothing is cached.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &str,
        policy: TtlPolicy,
        load: F,
    ) -> Result<(T, CacheOutcome), E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_json(key).await {
            debug!(key, "cache hit");
            return Ok((hit, CacheOutcome::Hit));
        }
        let value = load().await?;
        self.set_json(key, &value, policy).await;
        Ok((value, CacheOutcome::Miss))
    }

    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }
}
