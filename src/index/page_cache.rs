//! Bounded cache of decoded pages.
//!
//! Sharded LRU keyed by page number. A miss takes the fetch lock of the page's
//! stripe and checks again before decoding, so concurrent readers never decode
//! the same page twice while pages on other stripes load in parallel.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::IndexConfig;
use crate::error::Result;

const FETCH_STRIPES: usize = 64;

pub struct PageCache<P> {
    shards: Vec<Mutex<LruCache<u32, Arc<P>>>>,
    fetch_locks: Vec<Mutex<()>>,
}

impl<P> PageCache<P> {
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1).min(capacity.max(1));
        let per_shard = (capacity.max(1) + shards - 1) / shards;
        let cap = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shards).map(|_| Mutex::new(LruCache::new(cap))).collect(),
            fetch_locks: (0..FETCH_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.cache_pages, config.cache_shards)
    }

    #[inline]
    fn shard(&self, page: u32) -> &Mutex<LruCache<u32, Arc<P>>> {
        &self.shards[page as usize % self.shards.len()]
    }

    pub fn get(&self, page: u32) -> Option<Arc<P>> {
        self.shard(page).lock().get(&page).cloned()
    }

    pub fn insert(&self, page: u32, value: Arc<P>) {
        self.shard(page).lock().put(page, value);
    }

    /// Cached page, or `load()` under the page's fetch lock.
    pub fn get_or_load<F>(&self, page: u32, load: F) -> Result<Arc<P>>
    where
        F: FnOnce() -> Result<P>,
    {
        if let Some(hit) = self.get(page) {
            return Ok(hit);
        }
        let _guard = self.fetch_locks[page as usize % FETCH_STRIPES].lock();
        if let Some(hit) = self.get(page) {
            return Ok(hit);
        }
        let value = Arc::new(load()?);
        self.insert(page, Arc::clone(&value));
        Ok(value)
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|s| s.lock().cap().get()).sum()
    }
}

impl<P> std::fmt::Debug for PageCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_load_once_then_hit() {
        let cache = PageCache::new(4, 2);
        let loads = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_load(7, || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .unwrap();
            assert_eq!(*v, vec![1, 2, 3]);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bounded_eviction() {
        let cache = PageCache::new(4, 1);
        for page in 0..10u32 {
            cache.insert(page, Arc::new(page));
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.get(0).is_none());
        assert_eq!(cache.get(9).map(|v| *v), Some(9));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_load_not_cached() {
        let cache: PageCache<u8> = PageCache::new(2, 1);
        let err = cache.get_or_load(1, || Err(crate::error::IndexError::Closed));
        assert!(err.is_err());
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_concurrent_loads_decode_once() {
        let cache = Arc::new(PageCache::new(8, 4));
        let loads = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                std::thread::spawn(move || {
                    cache
                        .get_or_load(3, || {
                            loads.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(42u64)
                        })
                        .map(|v| *v)
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}
