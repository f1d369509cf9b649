//! Read-through memoization of path ownership.
//!
//! Reads share an `RwLock`; population on miss and [`OwnershipCache::clear`]
//! take the write side. Invalidation is wholesale: rule sets change rarely,
//! so entries carry no TTL. Size is bounded the same way: once the cache
//! holds `capacity` paths, the next insert starts over from empty.

use crate::core::error::WardenError;
use crate::core::pattern::normalize_path;
use crate::core::registry::{Ownership, OwnershipRegistry};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const DEFAULT_CACHE_CAPACITY: usize = 65_536;

#[derive(Default)]
struct CacheState {
    /// Bumped on every clear. A miss resolved under an older generation is
    /// returned to its caller but never stored.
    generation: u64,
    entries: FxHashMap<String, Ownership>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub generation: u64,
    /// Wholesale clears forced by `capacity`, not by rule changes.
    pub evictions: u64,
}

pub struct OwnershipCache {
    state: RwLock<CacheState>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for OwnershipCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl OwnershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `capacity` paths (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, CacheState>, WardenError> {
        self.state
            .read()
            .map_err(|_| WardenError::LockPoisoned("ownership cache"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, CacheState>, WardenError> {
        self.state
            .write()
            .map_err(|_| WardenError::LockPoisoned("ownership cache"))
    }

    /// Resolve through the cache, consulting `registry` only on a miss.
    pub fn get_owner(
        &self,
        registry: &OwnershipRegistry,
        path: &str,
    ) -> Result<Ownership, WardenError> {
        self.resolve_with(path, |normalized| Ok(registry.resolve_normalized(normalized)))
    }

    /// Like [`Self::get_owner`], but `resolve` is only called on a miss and
    /// after the generation has been read. A resolver that looks up the
    /// current rule set inside the closure can therefore never cache a result
    /// from rules that were swapped out concurrently.
    pub fn resolve_with<F>(&self, path: &str, resolve: F) -> Result<Ownership, WardenError>
    where
        F: FnOnce(&str) -> Result<Ownership, WardenError>,
    {
        let normalized = normalize_path(path)?;

        let generation = {
            let state = self.read()?;
            if let Some(hit) = state.entries.get(&normalized) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit.clone());
            }
            state.generation
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let resolved = resolve(&normalized)?;

        let mut state = self.write()?;
        if state.generation == generation {
            // Rules are unchanged, so the generation stays.
            if state.entries.len() >= self.capacity && !state.entries.contains_key(&normalized) {
                state.entries.clear();
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(capacity = self.capacity, "ownership cache full; cleared");
            }
            state
                .entries
                .entry(normalized)
                .or_insert_with(|| resolved.clone());
        }
        Ok(resolved)
    }

    pub fn clear(&self) -> Result<(), WardenError> {
        self.invalidate_with(|| ())
    }

    /// Run `f` while holding the write lock, then drop every entry.
    ///
    /// Used to swap rule sets so no reader can observe the new rules mixed
    /// with entries cached from the old ones.
    pub fn invalidate_with<R>(&self, f: impl FnOnce() -> R) -> Result<R, WardenError> {
        let mut state = self.write()?;
        let out = f();
        let dropped = state.entries.len();
        state.entries.clear();
        state.generation += 1;
        tracing::debug!(dropped, generation = state.generation, "ownership cache cleared");
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, generation) = self
            .read()
            .map(|s| (s.entries.len(), s.generation))
            .unwrap_or((0, 0));
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generation,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
