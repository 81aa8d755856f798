use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{KvStore, StoreError};

/// How often a write also purges every expired entry.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-process store used when Redis is unreachable, and in tests.
/// Expired entries are dropped when read, and swept on write once per
/// sweep interval so keys that are never read again do not pile up.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    sweep_interval: Duration,
}

struct Inner {
    entries: HashMap<String, Entry>,
    last_sweep: Instant,
}

impl Inner {
    fn sweep_if_due(&mut self, now: Instant, interval: Duration) {
        if now.duration_since(self.last_sweep) < interval {
            return;
        }
        self.entries.retain(|_, e| e.is_live(now));
        self.last_sweep = now;
    }
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            sweep_interval,
        }
    }

    /// Stored entries, expired or not.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.entries.get(key) {
            Some(e) if e.is_live(now) => Ok(Some(e.value.clone())),
            Some(_) => {
                inner.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.sweep_if_due(now, self.sweep_interval);
        inner.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.sweep_if_due(now, self.sweep_interval);
        if inner.entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().entries.remove(key).is_some())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
