//! TTL + least-hit eviction cache.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CacheConfig;

/// Counters describing cache behaviour since creation (or the last `clear`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Entries currently stored (live or not yet purged).
    pub size: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0 with no lookups.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    created_at: Instant,
    hit_count: u64,
    seq: u64,
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    // (hit_count, insertion seq, key); the first element is the eviction victim.
    order: BTreeSet<(u64, u64, K)>,
    next_seq: u64,
    stats: CacheStats,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Ord + Clone,
{
    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&(entry.hit_count, entry.seq, key.clone()));
        Some(entry)
    }

    fn purge_expired(&mut self, ttl: Duration, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.created_at) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    fn evict_one(&mut self) -> bool {
        let Some(victim) = self.order.iter().next().map(|(_, _, k)| k.clone()) else {
            return false;
        };
        self.remove(&victim);
        self.stats.evictions += 1;
        true
    }
}

/// A thread-safe cache with TTL expiry and least-hit eviction.
///
/// Reads take the same lock as writes; a hit bumps the entry's count.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    max_size: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Ord + Clone,
    V: Clone,
{
    /// Creates a cache. A `max_size` of zero is treated as one.
    #[must_use]
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeSet::new(),
                next_seq: 0,
                stats: CacheStats::default(),
            }),
            ttl,
            max_size: max_size.max(1),
        }
    }

    /// Creates a cache from configuration.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl, config.max_size)
    }

    /// Returns the entry TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the capacity.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Looks up a live entry, counting a hit.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(entry) = inner.entries.get_mut(key) else {
            inner.stats.misses += 1;
            return None;
        };

        if now.duration_since(entry.created_at) >= self.ttl {
            inner.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            return None;
        }

        inner.order.remove(&(entry.hit_count, entry.seq, key.clone()));
        entry.hit_count += 1;
        inner.order.insert((entry.hit_count, entry.seq, key.clone()));
        inner.stats.hits += 1;
        Some(entry.value.clone())
    }

    /// Inserts or replaces an entry.
    ///
    /// Replacing a key resets its age and hit count. When the cache is full,
    /// expired entries are purged first and then the least-hit entry is
    /// evicted.
    pub fn set(&self, key: K, value: V) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        inner.remove(&key);

        if inner.entries.len() >= self.max_size {
            inner.purge_expired(self.ttl, now);
        }
        while inner.entries.len() >= self.max_size {
            if !inner.evict_one() {
                break;
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert((0, seq, key.clone()));
        inner.entries.insert(
            key,
            Entry {
                value,
                created_at: now,
                hit_count: 0,
                seq,
            },
        );
    }

    /// Removes an entry, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key).map(|e| e.value)
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.inner.lock().purge_expired(self.ttl, now)
    }

    /// Removes every entry and resets statistics.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.stats = CacheStats::default();
    }

    /// Returns the number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }
}
