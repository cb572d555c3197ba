//! TTL cache keyed by upstream URL.
//!
//! Readers load the current map without locking; the refresher publishes a
//! new map with an atomic swap. Expired entries read as misses but stay
//! available through [`TtlCache::get_stale`].

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default entry lifetime
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
struct CacheEntry<T> {
    expires_at: Instant,
    value: Arc<T>,
}

/// Map of URL to value with a fixed time to live
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entries: ArcSwap<HashMap<String, Arc<CacheEntry<T>>>>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.get_at(key, Instant::now())
    }

    /// Value for `key` if it has not expired at `now`
    pub fn get_at(&self, key: &str, now: Instant) -> Option<Arc<T>> {
        self.entries
            .load()
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    /// Value for `key` regardless of expiry
    pub fn get_stale(&self, key: &str) -> Option<Arc<T>> {
        self.entries.load().get(key).map(|entry| entry.value.clone())
    }

    /// Replace the value for `key`
    pub fn set(&self, key: &str, value: T) -> Arc<T> {
        self.set_at(key, value, Instant::now())
    }

    pub fn set_at(&self, key: &str, value: T, now: Instant) -> Arc<T> {
        let entry = Arc::new(CacheEntry {
            expires_at: now + self.ttl,
            value: Arc::new(value),
        });
        let stored = entry.value.clone();
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(key.to_string(), entry.clone());
            next
        });
        stored
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
