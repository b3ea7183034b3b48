//! Expiring lookup cache.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use super::{CacheConfig, Clock, SystemClock};

/// Internal cache defects. Never expected in correct operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache '{cache}' holds {len} entries, over its capacity of {capacity}")]
    CapacityInvariantViolation {
        cache: String,
        len: usize,
        capacity: usize,
    },
}

/// The stored result of a lookup.
///
/// Immutable once built; a newer result replaces the whole entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    is_error: bool,
    created_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, is_error: bool, created_at: Instant) -> Self {
        Self {
            value,
            is_error,
            created_at,
        }
    }

    /// The payload. Only meaningful as a result when `is_error()` is false;
    /// for error entries it is whatever the caller stored to describe the failure.
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

struct Slot<V> {
    entry: Arc<CacheEntry<V>>,
    seq: u64,
}

struct Inner<K, V> {
    name: Arc<str>,
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: DashMap<K, Slot<V>>,
    /// Insertion order as `(key, seq)`. Pairs whose seq no longer matches the
    /// live slot are stale and skipped on eviction.
    order: Mutex<VecDeque<(K, u64)>>,
    next_seq: AtomicU64,
}

/// A bounded, time-expiring key/value store for lookup results.
///
/// This cache is:
/// - Thread-safe: `get`/`put`/`invalidate_all` need no external locking
/// - Bounded: at most `capacity` entries, oldest insertion evicted first
/// - Expiring: entries older than `ttl` are never returned
/// - Clone-friendly (cloning is cheap, shares the same underlying store)
pub struct ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    inner: Arc<Inner<K, V>>,
}

// Manual Clone implementation that doesn't require V: Clone
impl<K, V> Clone for ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a new cache with the given name and config.
    pub fn new(name: impl Into<Arc<str>>, config: CacheConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a cache driven by a custom clock.
    pub fn with_clock(
        name: impl Into<Arc<str>>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        if config.capacity == 0 {
            debug!("Cache '{}' configured with capacity 0, using 1", name);
        }

        Self {
            inner: Arc::new(Inner {
                name,
                capacity: config.capacity.max(1),
                ttl: config.ttl,
                clock,
                entries: DashMap::new(),
                order: Mutex::new(VecDeque::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Get the name of this cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Get the entry for `key`, whether it holds a success or an error.
    ///
    /// Returns `None` if the key is absent or its entry has expired.
    pub fn get_entry(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
        let (entry, seq) = {
            let slot = self.inner.entries.get(key)?;
            (Arc::clone(&slot.entry), slot.seq)
        };

        if entry.is_expired(self.inner.clock.now(), self.inner.ttl) {
            // Only drop the entry we looked at; a concurrent put may have replaced it.
            self.inner.entries.remove_if(key, |_, slot| slot.seq == seq);
            return None;
        }

        Some(entry)
    }

    /// Insert or overwrite the entry for `key`, stamped with the current time.
    ///
    /// When the cache is full, expired entries are purged first; if it is
    /// still full, the least recently inserted entry is evicted.
    pub fn put(&self, key: K, value: V, is_error: bool) {
        let mut order = self.inner.order.lock();

        let now = self.inner.clock.now();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(CacheEntry::new(value, is_error, now));

        let replaced = self
            .inner
            .entries
            .get_mut(&key)
            .map(|mut slot| {
                slot.entry = Arc::clone(&entry);
                slot.seq = seq;
            })
            .is_some();

        if !replaced {
            if self.inner.entries.len() >= self.inner.capacity {
                self.purge_expired_at(now);
            }
            while self.inner.entries.len() >= self.inner.capacity {
                if !self.evict_oldest(&mut order) {
                    break;
                }
            }
            self.inner.entries.insert(key.clone(), Slot { entry, seq });
        }

        order.push_back((key, seq));
        if order.len() > self.inner.capacity.saturating_mul(2).saturating_add(16) {
            self.compact(&mut order);
        }

        debug_assert!(self.verify().is_ok(), "{:?}", self.verify());
    }

    /// Cache a successful lookup.
    pub fn put_ok(&self, key: K, value: V) {
        self.put(key, value, false);
    }

    /// Cache a failed lookup. `detail` describes the failure to consumers.
    pub fn put_error(&self, key: K, detail: V) {
        self.put(key, detail, true);
    }

    /// Remove a key from the cache.
    #[allow(dead_code)]
    pub fn invalidate(&self, key: &K) {
        let _order = self.inner.order.lock();
        self.inner.entries.remove(key);
    }

    /// Remove all entries from the cache.
    pub fn invalidate_all(&self) {
        let mut order = self.inner.order.lock();
        self.inner.entries.clear();
        order.clear();
        debug!("Invalidated cache '{}'", self.inner.name);
    }

    /// Drop every expired entry. Returns how many were removed.
    #[allow(dead_code)]
    pub fn purge_expired(&self) -> usize {
        let _order = self.inner.order.lock();
        self.purge_expired_at(self.inner.clock.now())
    }

    /// Number of live (unexpired) entries.
    pub fn size(&self) -> usize {
        let now = self.inner.clock.now();
        self.inner
            .entries
            .iter()
            .filter(|slot| !slot.entry.is_expired(now, self.inner.ttl))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Check the capacity invariant against the physical store.
    pub fn verify(&self) -> Result<(), CacheError> {
        let len = self.inner.entries.len();
        if len > self.inner.capacity {
            return Err(CacheError::CapacityInvariantViolation {
                cache: self.inner.name.to_string(),
                len,
                capacity: self.inner.capacity,
            });
        }
        Ok(())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.inner.entries.len();
        let ttl = self.inner.ttl;
        self.inner.entries.retain(|_, slot| !slot.entry.is_expired(now, ttl));
        let removed = before.saturating_sub(self.inner.entries.len());
        if removed > 0 {
            debug!("Purged {} expired entries from cache '{}'", removed, self.inner.name);
        }
        removed
    }

    /// Evict the oldest live insertion. Returns false if nothing could be evicted.
    fn evict_oldest(&self, order: &mut VecDeque<(K, u64)>) -> bool {
        while let Some((key, seq)) = order.pop_front() {
            if self.inner.entries.remove_if(&key, |_, slot| slot.seq == seq).is_some() {
                debug!("Evicted oldest entry from cache '{}'", self.inner.name);
                return true;
            }
        }

        error!(
            "Cache '{}' is full but its insertion queue is empty ({} entries)",
            self.inner.name,
            self.inner.entries.len()
        );
        false
    }

    fn compact(&self, order: &mut VecDeque<(K, u64)>) {
        order.retain(|(key, seq)| {
            self.inner
                .entries
                .get(key)
                .map(|slot| slot.seq == *seq)
                .unwrap_or(false)
        });
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Get a successful value from the cache.
    ///
    /// Returns `None` if the key is absent, expired, or holds a cached error.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_entry(key)
            .filter(|entry| !entry.is_error())
            .map(|entry| entry.value().clone())
    }
}

impl<K, V> std::fmt::Debug for ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("ttl", &self.inner.ttl)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    fn cache_with_clock(
        capacity: usize,
        ttl_secs: u64,
    ) -> (ExpiringCache<String, String>, ManualClock) {
        let clock = ManualClock::new();
        let cache = ExpiringCache::with_clock(
            "test",
            CacheConfig::with_capacity(capacity).ttl(Duration::from_secs(ttl_secs)),
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn test_hit_until_ttl_elapses() {
        let (cache, clock) = cache_with_clock(10, 10);
        cache.put("fr".into(), "France".into(), false);

        assert_eq!(cache.get(&"fr".to_string()).as_deref(), Some("France"));

        clock.set(Duration::from_millis(9_999));
        assert_eq!(cache.get(&"fr".to_string()).as_deref(), Some("France"));

        clock.set(Duration::from_secs(10));
        assert_eq!(cache.get(&"fr".to_string()), None);
        assert!(cache.get_entry(&"fr".to_string()).is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest_insertion() {
        let (cache, clock) = cache_with_clock(2, 10);

        cache.put("fr".into(), "France".into(), false);
        clock.set(Duration::from_secs(1));
        cache.put("de".into(), "Germany".into(), false);
        clock.set(Duration::from_secs(2));
        cache.put("it".into(), "Italy".into(), false);

        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get(&"fr".to_string()), None);
        assert_eq!(cache.get(&"de".to_string()).as_deref(), Some("Germany"));
        assert_eq!(cache.get(&"it".to_string()).as_deref(), Some("Italy"));
        assert!(cache.verify().is_ok());
    }

    #[test]
    fn test_overwrite_counts_as_new_insertion() {
        let (cache, _clock) = cache_with_clock(2, 60);

        cache.put("a".into(), "1".into(), false);
        cache.put("b".into(), "2".into(), false);
        cache.put("a".into(), "3".into(), false);
        cache.put("c".into(), "4".into(), false);

        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()).as_deref(), Some("3"));
        assert_eq!(cache.get(&"c".to_string()).as_deref(), Some("4"));
    }

    #[test]
    fn test_expiry_is_not_sliding() {
        let (cache, clock) = cache_with_clock(10, 10);
        cache.put("k".into(), "v".into(), false);

        clock.set(Duration::from_secs(5));
        assert!(cache.get(&"k".to_string()).is_some());
        clock.set(Duration::from_secs(10));
        assert!(cache.get(&"k".to_string()).is_none());
    }

    #[test]
    fn test_error_entries_are_distinguishable() {
        let (cache, _clock) = cache_with_clock(10, 60);
        cache.put("10.0.0.1".into(), "timeout".into(), true);

        let entry = cache.get_entry(&"10.0.0.1".to_string()).unwrap();
        assert!(entry.is_error());
        assert_eq!(entry.value(), "timeout");

        // Cached errors never look like a successful value.
        assert_eq!(cache.get(&"10.0.0.1".to_string()), None);
        assert!(cache.get(&"unknown".to_string()).is_none());
        assert!(cache.get_entry(&"unknown".to_string()).is_none());
    }

    #[test]
    fn test_invalidate_all() {
        let (cache, _clock) = cache_with_clock(10, 60);
        cache.put_ok("a".into(), "1".into());
        cache.put_error("b".into(), "boom".into());

        cache.invalidate_all();

        assert_eq!(cache.size(), 0);
        assert!(cache.get_entry(&"a".to_string()).is_none());
        assert!(cache.get_entry(&"b".to_string()).is_none());
    }

    #[test]
    fn test_full_cache_prefers_dropping_expired_entries() {
        let (cache, clock) = cache_with_clock(2, 10);

        cache.put_ok("old".into(), "1".into());
        clock.set(Duration::from_secs(8));
        cache.put_ok("fresh".into(), "2".into());
        clock.set(Duration::from_secs(11));
        cache.put_ok("new".into(), "3".into());

        assert_eq!(cache.get(&"fresh".to_string()).as_deref(), Some("2"));
        assert_eq!(cache.get(&"new".to_string()).as_deref(), Some("3"));
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_size_ignores_expired_entries() {
        let (cache, clock) = cache_with_clock(10, 10);
        cache.put_ok("a".into(), "1".into());
        clock.set(Duration::from_secs(5));
        cache.put_ok("b".into(), "2".into());

        clock.set(Duration::from_secs(12));
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.purge_expired(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: ExpiringCache<u32, u32> =
            ExpiringCache::new("tiny", CacheConfig::with_capacity(0));
        cache.put_ok(1, 1);
        cache.put_ok(2, 2);

        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get(&2), Some(2));
    }

    #[test]
    fn test_huge_capacity_accepts_puts() {
        let cache: ExpiringCache<u32, u32> =
            ExpiringCache::new("big", CacheConfig::with_capacity(usize::MAX));
        for i in 0..100 {
            cache.put_ok(i % 10, i);
        }

        assert_eq!(cache.capacity(), usize::MAX);
        assert_eq!(cache.size(), 10);
        assert_eq!(cache.get(&9), Some(99));
    }

    #[test]
    fn test_repeated_overwrites_keep_queue_bounded() {
        let (cache, _clock) = cache_with_clock(3, 60);
        for i in 0..1_000 {
            cache.put_ok("same".into(), i.to_string());
        }

        assert_eq!(cache.size(), 1);
        assert!(cache.inner.order.lock().len() <= 3 * 2 + 16);
        assert_eq!(cache.get(&"same".to_string()).as_deref(), Some("999"));
    }

    #[test]
    fn test_concurrent_puts_respect_capacity() {
        let cache: ExpiringCache<u64, u64> =
            ExpiringCache::new("shared", CacheConfig::with_capacity(64));

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        cache.put_ok(t * 1_000 + i, i);
                        let _ = cache.get(&(t * 1_000 + i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.size() <= 64);
        assert!(cache.verify().is_ok());
    }
}
