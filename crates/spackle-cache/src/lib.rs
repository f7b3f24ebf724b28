//! Concretization cache for Spackle.
//!
//! Outcomes are keyed by the canonical hash of a request and stamped with the
//! content version of the repository they were computed against. Concurrent
//! requests for the same key share one computation; other keys never wait.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use spackle_core::{ConcreteSpec, ContentHash, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// What a concretization produced.
pub type Outcome = Result<Vec<Arc<ConcreteSpec>>>;

/// A memoized outcome.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Concrete roots, or the deterministic failure.
    pub outcome: Outcome,
    /// When the outcome was computed.
    pub computed_at: DateTime<Utc>,
    /// Repository content version the outcome was computed against.
    pub repo_version: ContentHash,
}

/// Cache statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of stored entries.
    pub entries: usize,
    /// Lookups answered from a stored entry.
    pub hits: u64,
    /// Lookups that had to compute.
    pub misses: u64,
    /// Calls to `compute`.
    pub computations: u64,
    /// Lookups that blocked on an in-flight computation of the same key.
    pub waits: u64,
    /// Whole-cache flushes caused by a repository change.
    pub invalidations: u64,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Single-flight cache of concretization outcomes.
#[derive(Debug)]
pub struct ConcretizationCache {
    slots: DashMap<ContentHash, Slot, ahash::RandomState>,
    repo_version: RwLock<Option<ContentHash>>,
    stats: RwLock<CacheStats>,
}

impl Default for ConcretizationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcretizationCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: DashMap::with_hasher(ahash::RandomState::new()),
            repo_version: RwLock::new(None),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Return the outcome stored for `key`, or run `compute` and store it.
    ///
    /// Callers racing on one key block until the first finishes and then
    /// reuse its outcome. Timeouts, cancellations and internal errors are
    /// handed back but never stored, so the next caller computes again.
    pub fn get_or_compute<F>(&self, key: ContentHash, repo_version: ContentHash, compute: F) -> Outcome
    where
        F: FnOnce() -> Outcome,
    {
        self.sync_repository(repo_version);

        let slot = Arc::clone(self.slots.entry(key).or_default().value());
        let mut guard = if let Some(guard) = slot.try_lock() {
            guard
        } else {
            self.stats.write().waits += 1;
            debug!(key = %key.short(), "waiting for in-flight concretization");
            slot.lock()
        };

        if let Some(entry) = guard.as_ref().filter(|e| e.repo_version == repo_version) {
            self.stats.write().hits += 1;
            debug!(key = %key.short(), "concretization cache hit");
            return entry.outcome.clone();
        }

        {
            let mut stats = self.stats.write();
            stats.misses += 1;
            stats.computations += 1;
        }
        let outcome = compute();

        let cacheable = outcome.as_ref().map_or_else(|err| err.is_deterministic(), |_| true);
        if cacheable && *self.repo_version.read() == Some(repo_version) {
            *guard = Some(CacheEntry {
                outcome: outcome.clone(),
                computed_at: Utc::now(),
                repo_version,
            });
        } else {
            debug!(key = %key.short(), cacheable, "outcome not stored");
        }
        outcome
    }

    /// Record the current repository version, flushing every entry if it
    /// changed. Returns whether a flush happened.
    pub fn sync_repository(&self, version: ContentHash) -> bool {
        if *self.repo_version.read() == Some(version) {
            return false;
        }
        let mut current = self.repo_version.write();
        match *current {
            Some(previous) if previous == version => false,
            Some(previous) => {
                let dropped = self.slots.len();
                self.slots.clear();
                *current = Some(version);
                self.stats.write().invalidations += 1;
                debug!(
                    from = %previous.short(),
                    to = %version.short(),
                    dropped,
                    "repository changed, cache flushed"
                );
                true
            }
            None => {
                *current = Some(version);
                false
            }
        }
    }

    /// The current entry for `key`, if any. Blocks while `key` is being
    /// computed.
    #[must_use]
    pub fn get(&self, key: &ContentHash) -> Option<CacheEntry> {
        let slot = self.slots.get(key).map(|slot| Arc::clone(slot.value()))?;
        let current = *self.repo_version.read();
        let entry = slot.lock().clone();
        entry.filter(|e| Some(e.repo_version) == current)
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().try_lock().is_some_and(|entry| entry.is_some()))
            .count()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.slots.clear();
        info!("concretization cache cleared");
    }

    /// Drop entries computed more than `max_age` ago. Keys being computed are
    /// left alone.
    pub fn prune(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot.try_lock() {
            Some(entry) => entry.as_ref().is_some_and(|e| e.computed_at >= cutoff),
            None => true,
        });
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            info!(count = removed, "pruned concretization cache entries");
        }
        removed
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().clone();
        stats.entries = self.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spackle_core::{CompilerSpec, Error, UnsatisfiableCore, Version};
    use std::collections::BTreeMap;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use test_case::test_case;

    fn spec(name: &str) -> Arc<ConcreteSpec> {
        Arc::new(ConcreteSpec::new(
            name,
            Version::parse("1.0").unwrap(),
            BTreeMap::new(),
            CompilerSpec::parse("gcc@12.2.0").unwrap(),
            "linux-x86_64",
            vec![],
        ))
    }

    fn key(s: &str) -> ContentHash {
        ContentHash::from_bytes(s.as_bytes())
    }

    #[test]
    fn second_lookup_hits() {
        let cache = ConcretizationCache::new();
        let repo = key("repo");
        let first = cache.get_or_compute(key("zlib"), repo, || Ok(vec![spec("zlib")])).unwrap();
        let second = cache
            .get_or_compute(key("zlib"), repo, || panic!("must not recompute"))
            .unwrap();
        assert!(Arc::ptr_eq(&first[0], &second[0]));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.computations), (1, 1, 1));
        assert_eq!(stats.entries, 1);
        assert!(cache.get(&key("zlib")).is_some());
    }

    #[test_case(Error::Unsatisfiable(Box::new(UnsatisfiableCore::default())), true ; "unsatisfiable")]
    #[test_case(Error::UnknownPackage { name: "x".into(), required_by: "request".into() }, true ; "unknown package")]
    #[test_case(Error::CyclicDependency { cycle: vec!["a".into(), "a".into()] }, true ; "cycle")]
    #[test_case(Error::SolverTimeout { steps: 5, elapsed_ms: 1 }, false ; "timeout")]
    #[test_case(Error::Cancelled, false ; "cancelled")]
    #[test_case(Error::Internal(vec![]), false ; "internal")]
    fn failures_are_stored_only_when_deterministic(err: Error, stored: bool) {
        let cache = ConcretizationCache::new();
        let repo = key("repo");
        let returned = cache.get_or_compute(key("req"), repo, || Err(err.clone()));
        assert_eq!(returned.unwrap_err(), err);
        assert_eq!(cache.get(&key("req")).is_some(), stored);

        let computed = AtomicUsize::new(0);
        let _ = cache.get_or_compute(key("req"), repo, || {
            computed.fetch_add(1, Ordering::SeqCst);
            Err(err.clone())
        });
        assert_eq!(computed.load(Ordering::SeqCst), usize::from(!stored));
    }

    #[test]
    fn repository_change_flushes() {
        let cache = ConcretizationCache::new();
        cache
            .get_or_compute(key("zlib"), key("v1"), || Ok(vec![spec("zlib")]))
            .unwrap();
        assert_eq!(cache.len(), 1);

        let recomputed = AtomicUsize::new(0);
        cache
            .get_or_compute(key("zlib"), key("v2"), || {
                recomputed.fetch_add(1, Ordering::SeqCst);
                Ok(vec![spec("zlib")])
            })
            .unwrap();
        assert_eq!(recomputed.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().invalidations, 1);
        assert!(!cache.sync_repository(key("v2")));
        assert!(cache.sync_repository(key("v3")));
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_lookups_compute_once() {
        const THREADS: usize = 8;
        let cache = ConcretizationCache::new();
        let computed = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    barrier.wait();
                    let roots = cache
                        .get_or_compute(key("hdf5"), key("repo"), || {
                            computed.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            Ok(vec![spec("hdf5")])
                        })
                        .unwrap();
                    assert_eq!(roots[0].name(), "hdf5");
                });
            }
        });

        assert_eq!(computed.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.hits, THREADS as u64 - 1);
    }

    #[test]
    fn prune_drops_old_entries() {
        let cache = ConcretizationCache::new();
        cache
            .get_or_compute(key("zlib"), key("repo"), || Ok(vec![spec("zlib")]))
            .unwrap();
        assert_eq!(cache.prune(chrono::Duration::hours(1)), 0);
        assert_eq!(cache.prune(chrono::Duration::seconds(-1)), 1);
        assert!(cache.is_empty());
    }
}
