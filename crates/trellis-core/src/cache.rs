//! In-memory TTL cache with bounded capacity
//!
//! Every subsystem that memoizes expensive work (generated graph queries,
//! HyDE documents) shares this cache type. Entries expire after a per-cache
//! TTL and the cache never holds more than its configured capacity: when
//! full, the oldest-inserted entry is evicted first.
//!
//! Caches are constructed once per engine instance and injected into the
//! components that need them. There are no process-wide globals, and no
//! cache survives a restart.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single memoized value with its insertion time.
struct CacheSlot<V> {
    value: V,
    inserted_at: Instant,
}

/// Bounded key→value cache with time-to-live expiry.
///
/// `get` never returns an entry whose TTL has elapsed; expired entries are
/// removed on access. Capacity eviction is insertion-ordered: the entry
/// inserted earliest is dropped first. Interior mutability via a `Mutex`
/// lets engine components share one cache behind an `Arc`; concurrent
/// identical computations may race to insert, which is acceptable because
/// cache writes are idempotent (same key, same recomputed value).
pub struct TtlCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    ttl: Duration,
    capacity: usize,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheSlot<V>>,
    /// Keys in first-insertion order. Holds exactly the keys of `entries`,
    /// so the front is always the next eviction victim.
    order: VecDeque<K>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache with the given TTL and maximum entry count.
    ///
    /// A zero capacity disables caching entirely (every `get` misses).
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity,
        }
    }

    /// Look up a key, returning a clone of the cached value if present and
    /// not expired. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        match inner.entries.get(key) {
            Some(slot) if slot.inserted_at.elapsed() < self.ttl => Some(slot.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                // A stale key left in `order` would alias a later re-insert.
                inner.order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    /// Insert or refresh a value. Refreshing an existing key keeps its
    /// original position in the eviction order.
    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock().expect("cache lock poisoned");

        let slot = CacheSlot {
            value,
            inserted_at: Instant::now(),
        };

        if inner.entries.insert(key.clone(), slot).is_none() {
            inner.order.push_back(key);
            while inner.entries.len() > self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
    }

    /// Number of live (possibly expired but not yet collected) entries.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry whose TTL has elapsed.
    pub fn purge_expired(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let ttl = self.ttl;
        let CacheInner { entries, order } = &mut *inner;
        entries.retain(|_, slot| slot.inserted_at.elapsed() < ttl);
        order.retain(|key| entries.contains_key(key));
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_insert_and_get() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60), 10);
        cache.insert("a".into(), 1);

        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_millis(20), 10);
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        thread::sleep(Duration::from_millis(40));

        // Expired entries are never returned, and the miss removes them.
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_inserted_first() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 3);
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.insert(3, 30);
        cache.insert(4, 40);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.get(&4), Some(40));
    }

    #[test]
    fn test_refresh_does_not_duplicate_or_grow() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 10);
        cache.insert(1, 11);
        cache.insert(2, 20);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some(11));

        // Key 1 keeps its original (oldest) slot, so it is evicted next.
        cache.insert(3, 30);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_reinserting_an_expired_key_keeps_eviction_order() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_millis(20), 2);
        cache.insert("a".into(), 1);

        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"a".to_string()), None);

        cache.insert("b".into(), 2);
        cache.insert("a".into(), 3);
        cache.insert("c".into(), 4);

        // "b" is now the oldest live insertion, so it is evicted first.
        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(3));
        assert_eq!(cache.get(&"c".to_string()), Some(4));
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_secs(60), 0);
        cache.insert(1, 10);
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_millis(20), 10);
        cache.insert(1, 10);
        cache.insert(2, 20);

        thread::sleep(Duration::from_millis(40));
        cache.insert(3, 30);
        cache.purge_expired();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_purge_rebuilds_eviction_order() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_millis(20), 2);
        cache.insert(1, 10);
        cache.insert(2, 20);

        thread::sleep(Duration::from_millis(40));
        cache.purge_expired();
        assert!(cache.is_empty());

        cache.insert(2, 22);
        cache.insert(1, 11);
        cache.insert(3, 30);

        // Key 2 is the oldest insertion after the purge.
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some(11));
        assert_eq!(cache.get(&3), Some(30));
    }
}
