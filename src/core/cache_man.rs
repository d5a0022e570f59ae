//! Thumbnail memory budget and clear epoch
//!
//! **Why**: Decoded thumbnails are large; the memory tier needs one shared
//! byte counter and a limit derived from the machine's available memory.
//! The epoch lets `clear()` invalidate generations that were already running.
//!
//! **Used by**: MemoryTier (usage accounting), ThumbnailCache (epoch)

use log::{debug, info};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use sysinfo::System;

/// Default share of available memory given to the memory tier (1/8).
pub const DEFAULT_MEM_FRACTION: f64 = 0.125;

/// Memory budget manager for the thumbnail memory tier.
#[derive(Debug)]
pub struct CacheManager {
    /// Atomically tracked decoded bytes held by the memory tier
    memory_usage: AtomicUsize,
    /// Maximum allowed bytes - atomic for lock-free updates
    max_memory_bytes: AtomicUsize,
    /// Bumped by every cache clear
    current_epoch: AtomicU64,
}

impl CacheManager {
    /// Create manager with limit = `mem_fraction` of currently available memory.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use reels::CacheManager;
    /// let manager = CacheManager::new(0.125); // 1/8 of available memory
    /// ```
    pub fn new(mem_fraction: f64) -> Self {
        let limit = Self::limit_for_fraction(mem_fraction);
        info!(
            "CacheManager init: limit={} MB ({:.1}% of available)",
            limit / 1024 / 1024,
            mem_fraction * 100.0
        );
        Self::with_limit(limit)
    }

    /// Create manager with an explicit byte limit.
    pub fn with_limit(max_memory_bytes: usize) -> Self {
        Self {
            memory_usage: AtomicUsize::new(0),
            max_memory_bytes: AtomicUsize::new(max_memory_bytes),
            current_epoch: AtomicU64::new(0),
        }
    }

    fn limit_for_fraction(mem_fraction: f64) -> usize {
        let mut sys = System::new();
        sys.refresh_memory();
        fraction_of(sys.available_memory() as usize, mem_fraction)
    }

    /// Increment epoch and return new value
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    /// Get current epoch
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Check if memory limit exceeded
    pub fn check_memory_limit(&self) -> bool {
        self.memory_usage.load(Ordering::Relaxed) > self.max_memory_bytes.load(Ordering::Relaxed)
    }

    /// Get memory statistics (usage, limit)
    pub fn mem(&self) -> (usize, usize) {
        let usage = self.memory_usage.load(Ordering::Relaxed);
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        (usage, limit)
    }

    /// Add memory usage
    pub fn add_memory(&self, bytes: usize) {
        self.memory_usage.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Free memory usage (saturating subtraction to prevent underflow)
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }
}

/// `mem_fraction` (clamped to 0..=1) of `available` bytes.
fn fraction_of(available: usize, mem_fraction: f64) -> usize {
    (available as f64 * mem_fraction.clamp(0.0, 1.0)) as usize
}
