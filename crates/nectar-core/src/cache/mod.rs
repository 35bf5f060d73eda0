//! TTL key/value cache with lazy eviction and hit/miss statistics.
//!
//! [`CacheManager`] is a concurrent map of string keys to values with an
//! optional expiry per entry. Expired entries are evicted on the read path
//! (lazy eviction); a periodic [`purge_expired`](CacheManager::purge_expired)
//! sweep exists for long-idle keys but lazy eviction is the primary
//! mechanism.
//!
//! # TTL policy
//!
//! A `None` TTL and a zero-duration TTL both mean the entry never expires.
//! This is the single documented policy for absent/non-positive TTLs.
//!
//! # Concurrency
//!
//! Backed by a sharded concurrent map: concurrent `set` calls on the same key
//! resolve last-writer-wins with no torn reads. Statistics are atomic
//! counters.

use dashmap::DashMap;
use serde::Serialize;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    #[allow(dead_code)]
    created_at: Instant,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Entries currently stored (expired-but-unswept entries included).
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent TTL cache keyed by `String`.
///
/// Values are cloned out on read; wrap large values in `Arc` at the call site
/// if cloning is expensive.
pub struct CacheManager<V: Clone> {
    entries: DashMap<String, CacheEntry<V>>,
    default_ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> Default for CacheManager<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> CacheManager<V> {
    /// Creates a cache with no default TTL (entries never expire unless a TTL
    /// is passed to [`set`](Self::set)).
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache whose [`set_with_default`](Self::set_with_default)
    /// applies `ttl` to new entries.
    #[must_use]
    pub fn with_default_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: if ttl.is_zero() { None } else { Some(ttl) },
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Stores `value` under `key`.
    ///
    /// `ttl` of `None` or zero means the entry never expires. Overwrites an
    /// existing entry (last writer wins).
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.filter(|d| !d.is_zero()).map(|d| now + d);
        self.entries.insert(key.into(), CacheEntry { value, created_at: now, expires_at });
    }

    /// Stores `value` under `key` using the cache's default TTL.
    pub fn set_with_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Returns the live value for `key`, or `None` if absent or expired.
    ///
    /// An expired entry is removed on this read path and counted as a miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            // Re-check under the removal: a concurrent overwrite may have
            // produced a fresh entry that must not be evicted.
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Removes `key`; returns `true` if an entry existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry. Statistics are preserved.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Removes every expired entry; returns the number removed.
    ///
    /// Used by the runtime's background janitor for keys that are never read
    /// again and would otherwise linger past expiry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Current size and hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
