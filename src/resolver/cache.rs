//! Time-bounded value cache.

use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires: Instant,
}

/// Template values with a fixed time-to-live.
///
/// Entries are never returned at or after their expiry. A zero TTL disables
/// caching: inserts are dropped.
#[derive(Debug)]
pub struct TtlCache {
    ttl: Duration,
    entries: FxHashMap<String, CacheEntry>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: FxHashMap::default(),
        }
    }

    pub fn get_at(&self, name: &str, now: Instant) -> Option<&str> {
        self.entries
            .get(name)
            .filter(|entry| now < entry.expires)
            .map(|entry| entry.value.as_str())
    }

    pub fn insert_at(&mut self, name: &str, value: &str, now: Instant) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(
            name.to_owned(),
            CacheEntry {
                value: value.to_owned(),
                expires: now + self.ttl,
            },
        );
    }

    /// Drop expired entries.
    pub fn purge_at(&mut self, now: Instant) {
        self.entries.retain(|_, entry| now < entry.expires);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl() {
        let now = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.insert_at("a.b", "7", now);

        assert_eq!(cache.get_at("a.b", now), Some("7"));
        assert_eq!(cache.get_at("a.b", now + Duration::from_secs(59)), Some("7"));
        assert_eq!(cache.get_at("missing", now), None);
    }

    #[test]
    fn test_never_returned_after_expiry() {
        let now = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.insert_at("a.b", "7", now);

        assert_eq!(cache.get_at("a.b", now + Duration::from_secs(60)), None);
        assert_eq!(cache.get_at("a.b", now + Duration::from_secs(61)), None);
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let now = Instant::now();
        let mut cache = TtlCache::new(Duration::ZERO);
        cache.insert_at("a.b", "7", now);

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get_at("a.b", now), None);
    }

    #[test]
    fn test_purge_and_clear() {
        let now = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(10));
        cache.insert_at("old", "1", now);
        cache.insert_at("new", "2", now + Duration::from_secs(5));

        cache.purge_at(now + Duration::from_secs(12));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("new", now + Duration::from_secs(12)), Some("2"));

        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_reinsert_refreshes_expiry() {
        let now = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(10));
        cache.insert_at("a", "1", now);
        cache.insert_at("a", "2", now + Duration::from_secs(8));

        assert_eq!(cache.get_at("a", now + Duration::from_secs(15)), Some("2"));
    }
}
