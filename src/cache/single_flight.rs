// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-flight caches.
//!
//! Concurrent readers of the same missing or expired key share one load:
//!
//! ```text
//! get_or_load(k)
//!       │
//!       ▼
//! ┌──────────────────────────────┐
//! │ slot = map[k]                │  expired slot? replace with empty one
//! │ (DashMap shard lock only)    │
//! └──────────────────────────────┘
//!       │
//!       ├─→ slot loaded → hit
//!       │
//!       └─→ slot empty  → OnceCell init: first caller runs the loader,
//!                         the rest await the same cell
//! ```
//!
//! No map lock is held across the loader's `.await`. A failed load leaves
//! the cell empty, so the next waiter runs its own loader.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

use super::policy::ExpirationPolicy;
use crate::metrics;

struct Loaded<V> {
    value: V,
    written_at: Instant,
}

struct Slot<V> {
    cell: OnceCell<Loaded<V>>,
    last_access: Mutex<Instant>,
}

impl<V> Slot<V> {
    fn empty(now: Instant) -> Self {
        Self {
            cell: OnceCell::new(),
            last_access: Mutex::new(now),
        }
    }

    fn loaded(value: V, now: Instant) -> Self {
        Self {
            cell: OnceCell::from(Loaded {
                value,
                written_at: now,
            }),
            last_access: Mutex::new(now),
        }
    }

    /// A slot still loading is never expired.
    fn is_expired(&self, policy: &ExpirationPolicy, now: Instant) -> bool {
        match self.cell.get() {
            Some(loaded) => policy.is_expired(loaded.written_at, *self.last_access.lock(), now),
            None => false,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Loader invocations (at most one per miss burst)
    pub loads: u64,
    pub entry_count: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

/// Keyed single-flight cache with an [`ExpirationPolicy`].
pub struct SingleFlightCache<K, V> {
    name: &'static str,
    policy: ExpirationPolicy,
    slots: DashMap<K, Arc<Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `name` labels log lines and metrics.
    pub fn new(name: &'static str, policy: ExpirationPolicy) -> Self {
        Self {
            name,
            policy,
            slots: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn policy(&self) -> ExpirationPolicy {
        self.policy
    }

    /// Current slot for `key`, replacing an expired one. Refreshes the
    /// access time.
    fn slot(&self, key: K, now: Instant) -> Arc<Slot<V>> {
        let mut entry = self
            .slots
            .entry(key)
            .or_insert_with(|| Arc::new(Slot::empty(now)));
        if entry.is_expired(&self.policy, now) {
            *entry = Arc::new(Slot::empty(now));
        }
        *entry.last_access.lock() = now;
        Arc::clone(&entry)
    }

    /// Return the cached value for `key`, running `load` if it is missing or
    /// expired. Concurrent callers for the same key share a single load.
    pub async fn get_or_load<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key, Instant::now());

        if let Some(loaded) = slot.cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_request(self.name, true);
            return Ok(loaded.value.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_request(self.name, false);

        let loaded = slot
            .cell
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_load(self.name);
                debug!(cache = self.name, "Loading cache entry");
                let value = load().await?;
                Ok::<_, E>(Loaded {
                    value,
                    written_at: Instant::now(),
                })
            })
            .await?;
        Ok(loaded.value.clone())
    }

    /// The cached value, without loading or touching access time.
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key)?;
        if slot.is_expired(&self.policy, Instant::now()) {
            return None;
        }
        slot.cell.get().map(|loaded| loaded.value.clone())
    }

    /// Rewrite a cached value in place. Returns false when there was nothing
    /// to patch: absent keys stay absent, and a key whose load is in flight
    /// (or whose value expired) is invalidated instead.
    pub fn patch(&self, key: &K, edit: impl FnOnce(&V) -> V) -> bool {
        let now = Instant::now();
        let Some(mut entry) = self.slots.get_mut(key) else {
            return false;
        };
        let patched = if entry.is_expired(&self.policy, now) {
            None
        } else {
            entry.cell.get().map(|loaded| edit(&loaded.value))
        };
        match patched {
            Some(value) => {
                *entry = Arc::new(Slot::loaded(value, now));
                true
            }
            None => {
                let stale = Arc::clone(&entry);
                drop(entry);
                self.slots.remove_if(key, |_, slot| Arc::ptr_eq(slot, &stale));
                false
            }
        }
    }

    /// Patch every loaded entry, dropping the ones still loading.
    pub fn patch_all(&self, mut edit: impl FnMut(&K, &V) -> V) {
        let keys: Vec<K> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.patch(&key, |value| edit(&key, value));
        }
    }

    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    pub fn invalidate_all(&self) {
        self.slots.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            loads: self.loads.load(Ordering::Relaxed),
            entry_count: self.slots.len(),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Single-entry cache, e.g. the full name set of one catalog.
pub struct SingletonCache<V> {
    inner: SingleFlightCache<(), V>,
}

impl<V: Clone> SingletonCache<V> {
    pub fn new(name: &'static str, policy: ExpirationPolicy) -> Self {
        Self {
            inner: SingleFlightCache::new(name, policy),
        }
    }

    pub async fn get_or_load<F, Fut, E>(&self, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        self.inner.get_or_load((), load).await
    }

    pub fn get_if_present(&self) -> Option<V> {
        self.inner.get_if_present(&())
    }

    pub fn patch(&self, edit: impl FnOnce(&V) -> V) -> bool {
        self.inner.patch(&(), edit)
    }

    pub fn invalidate(&self) {
        self.inner.invalidate(&());
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
