//! Memory tier - size-weighted LRU of decoded thumbnails
//!
//! Weight of an entry is its decoded byte size; the budget lives in
//! [`CacheManager`]. Access (get or insert) makes an entry most recent;
//! eviction pops least recent entries until usage fits the limit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace};
use lru::LruCache;

use crate::core::cache_man::CacheManager;
use crate::entities::{Thumbnail, ThumbnailKey};

/// Cache statistics for monitoring performance
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

/// Bounded in-memory tier. Safe for concurrent use.
#[derive(Debug)]
pub struct MemoryTier {
    /// Unbounded by count - eviction is driven by byte budget
    lru: Mutex<LruCache<ThumbnailKey, Thumbnail>>,
    manager: Arc<CacheManager>,
    stats: Arc<CacheStats>,
}

impl MemoryTier {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self {
            lru: Mutex::new(LruCache::unbounded()),
            manager,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Lookup; a hit becomes most recently used.
    pub fn get(&self, key: &ThumbnailKey) -> Option<Thumbnail> {
        let result = {
            let mut lru = self.lru.lock().unwrap_or_else(|e| e.into_inner());
            lru.get(key).cloned()
        };

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        result
    }

    /// Check presence without touching recency.
    pub fn contains(&self, key: &ThumbnailKey) -> bool {
        self.lru.lock().unwrap_or_else(|e| e.into_inner()).contains(key)
    }

    /// Insert (or replace) an entry, then evict least recent entries while over budget.
    ///
    /// An entry larger than the whole budget is evicted right away.
    pub fn insert(&self, key: ThumbnailKey, thumb: Thumbnail) {
        let size = thumb.mem();
        let mut lru = self.lru.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(old) = lru.put(key.clone(), thumb) {
            self.manager.free_memory(old.mem());
        }
        self.manager.add_memory(size);
        trace!("Memory tier put: {} ({} bytes)", key.handle, size);

        while self.manager.check_memory_limit() {
            match lru.pop_lru() {
                Some((evicted_key, evicted)) => {
                    self.manager.free_memory(evicted.mem());
                    debug!(
                        "LRU evicted: {}@{}ms ({} KB)",
                        evicted_key.handle,
                        evicted_key.timestamp_ms,
                        evicted.mem() / 1024
                    );
                }
                None => break,
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut lru = self.lru.lock().unwrap_or_else(|e| e.into_inner());
        for (_, thumb) in lru.iter() {
            self.manager.free_memory(thumb.mem());
        }
        lru.clear();
        debug!("Memory tier cleared");
    }

    pub fn len(&self) -> usize {
        self.lru.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// (bytes used, byte limit)
    pub fn mem(&self) -> (usize, usize) {
        self.manager.mem()
    }
}
