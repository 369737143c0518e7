//! Per-adapter probe-result cache
//!
//! Owned by (and injected into) the adapter or collector that uses it, with
//! an explicit TTL and an explicit `reset` for tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Default time a probe result stays fresh
pub const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Entry<T> {
    stored_at: Instant,
    value: T,
}

/// TTL cache keyed by account (or account/model) ID
#[derive(Debug)]
pub struct ProbeCache<T> {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry<T>>>,
}

impl<T: Clone> ProbeCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any
    pub async fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: impl Into<String>, value: T) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.into(),
            Entry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Drop every entry
    pub async fn reset(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, fresh or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T: Clone> Default for ProbeCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_within_ttl() {
        let cache = ProbeCache::new(Duration::from_secs(60));
        cache.insert("acct-1", 42u32).await;
        assert_eq!(cache.get("acct-1").await, Some(42));
        assert_eq!(cache.get("acct-2").await, None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = ProbeCache::new(Duration::from_millis(10));
        cache.insert("acct-1", "probe".to_string()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("acct-1").await, None);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_reset_and_invalidate() {
        let cache = ProbeCache::new(Duration::from_secs(60));
        cache.insert("a", 1).await;
        cache.insert("b", 2).await;

        cache.invalidate("a").await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(2));

        cache.reset().await;
        assert!(cache.is_empty().await);
    }
}
