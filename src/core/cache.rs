//! Shared tile cache with LRU eviction and single-flight computation.
//!
//! Backed by `moka::sync::Cache`, weighted by tile byte size. A miss goes
//! through `try_get_with`, which coalesces concurrent requests for the same
//! key: exactly one caller runs the computation and every waiter observes its
//! result. Failed computations are not cached.
//!
//! Entries are only ever recomputable derived data, so eviction never affects
//! correctness.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::trace;

use crate::core::tile::{Tile, TileKey};
use crate::error::{Error, Result};

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub entry_count: u64,
    pub size_bytes: u64,
}

pub struct TileCache {
    cache: Cache<TileKey, Arc<Tile>>,
    max_size_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
}

impl TileCache {
    /// Create a cache holding at most `max_size_bytes` of sample data.
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            // Weight each entry by its sample buffer size
            .weigher(|_key: &TileKey, tile: &Arc<Tile>| -> u32 {
                tile.byte_size().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            cache,
            max_size_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    /// Cache lookup without computation.
    pub fn get(&self, key: &TileKey) -> Option<Arc<Tile>> {
        match self.cache.get(key) {
            Some(tile) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(tile)
            }
            None => None,
        }
    }

    /// Returns the cached tile for `key`, computing it with `compute` on a miss.
    ///
    /// Concurrent callers for the same key share a single computation; if it
    /// fails, all of them receive the same error.
    pub fn get_or_compute<F>(&self, key: TileKey, compute: F) -> Result<Arc<Tile>>
    where
        F: FnOnce() -> Result<Tile>,
    {
        if let Some(tile) = self.get(&key) {
            return Ok(tile);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        self.cache
            .try_get_with(key, || {
                self.computations.fetch_add(1, Ordering::Relaxed);
                trace!(node = key.node.0, band = key.band, rect = %key.rect, "Computing tile");
                compute().map(Arc::new)
            })
            .map_err(Error::from_shared)
    }

    pub fn insert(&self, key: TileKey, tile: Tile) {
        self.cache.insert(key, Arc::new(tile));
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Drops one entry; it is recomputed on the next request.
    pub fn invalidate(&self, key: &TileKey) {
        self.cache.invalidate(key);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn size_bytes(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.weighted_size()
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            entry_count: self.entry_count(),
            size_bytes: self.size_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tile::{NodeIndex, Rect};
    use ndarray::Array2;
    use std::sync::{Barrier, mpsc};
    use std::time::Duration;

    fn key(n: usize) -> TileKey {
        TileKey::new(1, NodeIndex(n), 0, Rect::new(0, 0, 4, 4))
    }

    fn tile(value: f32) -> Tile {
        Tile::new(Rect::new(0, 0, 4, 4), Array2::from_elem((4, 4), value)).unwrap()
    }

    #[test]
    fn test_cache_new() {
        let cache = TileCache::new(1_000_000);
        assert_eq!(cache.max_size_bytes(), 1_000_000);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_hit_does_not_recompute() {
        let cache = TileCache::new(1_000_000);
        let first = cache.get_or_compute(key(1), || Ok(tile(1.0))).unwrap();
        let second = cache
            .get_or_compute(key(1), || panic!("must not recompute"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.size_bytes, 64);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = TileCache::new(1_000_000);
        let err = cache.get_or_compute(key(1), || Err(Error::Processing("boom".into())));
        assert!(err.is_err());
        assert!(!cache.contains(&key(1)));
        assert!(cache.get_or_compute(key(1), || Ok(tile(2.0))).is_ok());
    }

    #[test]
    fn test_single_flight() {
        let cache = TileCache::new(1_000_000);
        let barrier = Barrier::new(8);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    let t = cache
                        .get_or_compute(key(7), || {
                            std::thread::sleep(Duration::from_millis(50));
                            Ok(tile(7.0))
                        })
                        .unwrap();
                    assert_eq!(t.data[[0, 0]], 7.0);
                });
            }
        });
        assert_eq!(cache.stats().computations, 1);
    }

    #[test]
    fn test_waiters_get_value_while_cache_is_squeezed() {
        // Room for two 64-byte tiles.
        let cache = &TileCache::new(128);
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        std::thread::scope(|s| {
            let owner = s.spawn(move || {
                cache
                    .get_or_compute(key(1), || {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(tile(1.0))
                    })
                    .unwrap()
            });
            started_rx.recv().unwrap();

            let waiters: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(move || {
                        cache
                            .get_or_compute(key(1), || panic!("waiter must not compute"))
                            .unwrap()
                    })
                })
                .collect();
            std::thread::sleep(Duration::from_millis(50));

            for n in 2..12 {
                cache.insert(key(n), tile(n as f32));
            }
            assert!(cache.size_bytes() <= 128);
            release_tx.send(()).unwrap();

            let value = owner.join().unwrap();
            assert_eq!(value.data[[0, 0]], 1.0);
            for waiter in waiters {
                assert!(Arc::ptr_eq(&waiter.join().unwrap(), &value));
            }
        });
        assert_eq!(cache.stats().computations, 1);
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let cache = TileCache::new(1_000_000);
        let first = cache.get_or_compute(key(1), || Ok(tile(3.0))).unwrap();
        cache.invalidate(&key(1));
        let second = cache.get_or_compute(key(1), || Ok(tile(3.0))).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
        assert_eq!(cache.stats().computations, 2);
    }

    #[test]
    fn test_byte_budget_bounds_size() {
        // Room for two 64-byte tiles.
        let cache = TileCache::new(128);
        for n in 0..10 {
            cache.get_or_compute(key(n), || Ok(tile(n as f32))).unwrap();
        }
        assert!(cache.size_bytes() <= 128);
        assert!(cache.entry_count() <= 2);
    }

    #[test]
    fn test_clear() {
        let cache = TileCache::new(1_000_000);
        cache.insert(key(1), tile(1.0));
        assert!(cache.contains(&key(1)));
        cache.clear();
        assert!(!cache.contains(&key(1)));
    }
}
