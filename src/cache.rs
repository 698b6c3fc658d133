//! Result Cache
//!
//! TTL memoization for metadata, query and correlation results. Keys are
//! composite strings `{session}:{fingerprint}:{sortedColumns}` so a whole
//! session can be dropped by prefix when its dataset changes.

use dashmap::DashMap;
use itertools::Itertools;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Build a cache key. The fingerprint is kept byte-exact since SQL literals and
/// column names are case-sensitive; columns are sorted so the same set always
/// yields the same key.
pub fn cache_key<S: AsRef<str>>(session_id: &str, fingerprint: &str, columns: &[S]) -> String {
    let columns = columns.iter().map(|c| c.as_ref()).sorted_unstable().dedup().join(",");
    format!("{}:{}:{}", session_id, fingerprint, columns)
}

pub struct ResultCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    default_ttl: Duration,
    name: &'static str,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(name: &'static str, default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            name,
        }
    }

    /// Live value for `key`. Expired entries are removed, never returned.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                debug!(cache = self.name, key, "Cache hit");
                return Some(entry.value.clone());
            }
        } else {
            debug!(cache = self.name, key, "Cache miss");
            return None;
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        debug!(cache = self.name, key, "Cache entry expired");
        None
    }

    pub fn set(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let now = Instant::now();
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry belonging to `session_id`. Returns how many were removed.
    pub fn invalidate_session(&self, session_id: &str) -> usize {
        let prefix = format!("{}:", session_id);
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(cache = self.name, session_id, removed, "Invalidated session entries");
        }
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_sorts_columns_only() {
        let a = cache_key("s1", "SELECT * FROM dataset", &["b", "a"]);
        let b = cache_key("s1", "SELECT * FROM dataset", &["a", "b", "a"]);
        assert_eq!(a, b);
        assert_eq!(a, "s1:SELECT * FROM dataset:a,b");

        let upper = cache_key::<&str>("s1", "SELECT * FROM dataset WHERE name = 'A'", &[]);
        let lower = cache_key::<&str>("s1", "SELECT * FROM dataset WHERE name = 'a'", &[]);
        assert_ne!(upper, lower);
        assert_ne!(
            cache_key::<&str>("s1", "correlation:Sales", &[]),
            cache_key::<&str>("s1", "correlation:sales", &[])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl_then_expire() {
        let cache: ResultCache<Vec<i32>> = ResultCache::new("test", Duration::from_secs(60));
        cache.set("s1:q:a", vec![1, 2, 3]);
        assert_eq!(cache.get("s1:q:a"), Some(vec![1, 2, 3]));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("s1:q:a"), Some(vec![1, 2, 3]));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("s1:q:a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_session_only_touches_prefix() {
        let cache: ResultCache<i32> = ResultCache::new("test", Duration::from_secs(60));
        cache.set(cache_key("s1", "q1", &["a"]), 1);
        cache.set(cache_key("s1", "q2", &["b"]), 2);
        cache.set(cache_key("s10", "q1", &["a"]), 3);
        cache.set(cache_key("s2", "q1", &["a"]), 4);

        assert_eq!(cache.invalidate_session("s1"), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&cache_key("s10", "q1", &["a"])), Some(3));
        assert_eq!(cache.get(&cache_key("s2", "q1", &["a"])), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache: ResultCache<i32> = ResultCache::new("test", Duration::from_secs(10));
        cache.set("s1:a:", 1);
        cache.set_with_ttl("s1:b:", 2, Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("s1:b:"), Some(2));
    }
}
