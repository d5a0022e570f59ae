//! Two-tier thumbnail cache with per-key generation dedup
//!
//! **Why**: Decoding a frame is expensive and the feed asks for the same
//! thumbnails repeatedly (prefetch window, active position, restarts).
//!
//! **Used by**: FeedOrchestrator (prefetch jobs), binary (locators, stats)
//!
//! # Lookup order
//!
//! 1. Memory tier (size-weighted LRU, budget from [`CacheManager`])
//! 2. Disk tier (JPEG per key, survives restarts); a hit refills memory
//! 3. Another caller generating the same key: wait for it (bounded by
//!    [`InFlightWait::ceiling`], polled every [`InFlightWait::poll`]), then
//!    look again
//! 4. Generate via [`ThumbnailGenerator`], populate both tiers
//!
//! # Concurrency
//!
//! The in-flight set holds at most one marker per key. A marker is owned by
//! an [`InFlightGuard`] and removed on drop, so success, failure and panic
//! all release it and wake waiters. Failures are not cached.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::core::cache_man::CacheManager;
use crate::core::disk_tier::DiskTier;
use crate::core::generator::ThumbnailGenerator;
use crate::core::memory_tier::{CacheStats, MemoryTier};
use crate::entities::{DEFAULT_TIMESTAMP_MS, FeedError, Thumbnail, ThumbnailKey, VideoHandle};

/// Bounded wait on another caller's in-flight generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightWait {
    /// Re-check interval
    pub poll: Duration,
    /// Total wait before generating anyway
    pub ceiling: Duration,
}

impl Default for InFlightWait {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
            ceiling: Duration::from_secs(3),
        }
    }
}

/// Outcome of trying to become the generator for a key.
enum Claim<'a> {
    /// We hold the marker
    Owner(InFlightGuard<'a>),
    /// Previous owner released the marker
    Released,
    /// Ceiling reached with the marker still held by someone else
    TimedOut,
}

/// Removes the in-flight marker on drop and wakes waiters.
struct InFlightGuard<'a> {
    cache: &'a ThumbnailCache,
    key: ThumbnailKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.cache.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.key);
        drop(in_flight);
        self.cache.in_flight_done.notify_all();
    }
}

/// Thumbnail cache shared by all feed workers.
pub struct ThumbnailCache {
    memory: MemoryTier,
    disk: DiskTier,
    manager: Arc<CacheManager>,
    generator: Arc<dyn ThumbnailGenerator>,
    in_flight: Mutex<HashSet<ThumbnailKey>>,
    in_flight_done: Condvar,
    wait: InFlightWait,
    default_timestamp_ms: u64,
    generations: AtomicU64,
}

impl std::fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("disk", &self.disk.dir())
            .field("memory_entries", &self.memory.len())
            .field("wait", &self.wait)
            .field("default_timestamp_ms", &self.default_timestamp_ms)
            .finish()
    }
}

impl ThumbnailCache {
    /// Create cache with disk tier under `dir` and memory budget from `manager`.
    pub fn new(
        dir: impl Into<PathBuf>,
        manager: Arc<CacheManager>,
        generator: Arc<dyn ThumbnailGenerator>,
    ) -> Self {
        let disk = DiskTier::new(dir);
        debug!("ThumbnailCache created: dir={}", disk.dir().display());
        Self {
            memory: MemoryTier::new(Arc::clone(&manager)),
            disk,
            manager,
            generator,
            in_flight: Mutex::new(HashSet::new()),
            in_flight_done: Condvar::new(),
            wait: InFlightWait::default(),
            default_timestamp_ms: DEFAULT_TIMESTAMP_MS,
            generations: AtomicU64::new(0),
        }
    }

    pub fn with_wait(mut self, wait: InFlightWait) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_default_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.default_timestamp_ms = timestamp_ms;
        self
    }

    /// Thumbnail at the default timestamp, or `None` if it cannot be produced.
    pub fn get(&self, handle: &VideoHandle) -> Option<Thumbnail> {
        self.get_at(handle, self.default_timestamp_ms)
    }

    /// Thumbnail at `timestamp_ms`, or `None` (failure logged).
    pub fn get_at(&self, handle: &VideoHandle, timestamp_ms: u64) -> Option<Thumbnail> {
        match self.try_get_at(handle, timestamp_ms) {
            Ok(thumb) => Some(thumb),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    /// Thumbnail at `timestamp_ms`; `GenerationFailed` if the backend cannot produce it.
    pub fn try_get_at(&self, handle: &VideoHandle, timestamp_ms: u64) -> Result<Thumbnail, FeedError> {
        let key = ThumbnailKey::new(handle.clone(), timestamp_ms);

        if let Some(thumb) = self.lookup(&key) {
            return Ok(thumb);
        }

        let deadline = Instant::now() + self.wait.ceiling;
        loop {
            match self.claim(&key, deadline) {
                Claim::Owner(guard) => {
                    // Someone may have finished between lookup and claim
                    if let Some(thumb) = self.lookup(&key) {
                        return Ok(thumb);
                    }
                    return self.generate(&key, Some(guard));
                }
                Claim::Released => {
                    if let Some(thumb) = self.lookup(&key) {
                        return Ok(thumb);
                    }
                    trace!("In-flight generation for {} left nothing, retrying", key.handle);
                }
                Claim::TimedOut => {
                    warn!(
                        "Generation for {} still in flight after {:?}, generating anyway",
                        key.handle, self.wait.ceiling
                    );
                    return self.generate(&key, None);
                }
            }
        }
    }

    /// Memory tier, then disk tier (refilling memory on a disk hit).
    fn lookup(&self, key: &ThumbnailKey) -> Option<Thumbnail> {
        if let Some(thumb) = self.memory.get(key) {
            return Some(thumb);
        }
        let image = self.disk.load(key)?;
        let thumb = Thumbnail::new(image);
        self.memory.insert(key.clone(), thumb.clone());
        trace!("Disk hit: {}", key.handle);
        Some(thumb)
    }

    /// Take the marker for `key`, or wait for its owner until `deadline`.
    fn claim(&self, key: &ThumbnailKey, deadline: Instant) -> Claim<'_> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.insert(key.clone()) {
            return Claim::Owner(InFlightGuard { cache: self, key: key.clone() });
        }

        while in_flight.contains(key) {
            let now = Instant::now();
            if now >= deadline {
                return Claim::TimedOut;
            }
            let step = self.wait.poll.min(deadline - now);
            in_flight = self
                .in_flight_done
                .wait_timeout(in_flight, step)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        Claim::Released
    }

    /// Run the backend and populate both tiers.
    ///
    /// The guard (if any) is held until both tiers are written, then dropped.
    fn generate(&self, key: &ThumbnailKey, guard: Option<InFlightGuard<'_>>) -> Result<Thumbnail, FeedError> {
        let epoch = self.manager.current_epoch();
        self.generations.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let image = self.generator.generate(&key.handle, key.timestamp_ms)?;
        let thumb = Thumbnail::new(image);
        debug!(
            "Generated thumbnail {}@{}ms ({}x{}) in {:?}",
            key.handle,
            key.timestamp_ms,
            thumb.width(),
            thumb.height(),
            started.elapsed()
        );

        if self.manager.current_epoch() == epoch {
            self.memory.insert(key.clone(), thumb.clone());
            if let Err(e) = self.disk.store(key, thumb.image()) {
                warn!("{}", e);
            }
        } else {
            debug!("Cache cleared while generating {}, result not cached", key.handle);
        }

        drop(guard);
        Ok(thumb)
    }

    /// Best-effort warm-up. Failures are logged and skipped.
    ///
    /// Returns how many thumbnails are now available.
    pub fn pre_cache(&self, handles: &[VideoHandle]) -> usize {
        let mut available = 0;
        for handle in handles {
            match self.try_get_at(handle, self.default_timestamp_ms) {
                Ok(_) => available += 1,
                Err(e) => warn!("Error pre-caching thumbnail: {}", e),
            }
        }
        debug!("Pre-cached {}/{} thumbnails", available, handles.len());
        available
    }

    /// Disk location of the default-timestamp thumbnail, if cached.
    pub fn cache_locator(&self, handle: &VideoHandle) -> Option<PathBuf> {
        self.cache_locator_at(handle, self.default_timestamp_ms)
    }

    /// Disk location of the thumbnail at `timestamp_ms`, if cached.
    pub fn cache_locator_at(&self, handle: &VideoHandle, timestamp_ms: u64) -> Option<PathBuf> {
        self.disk.locate(&ThumbnailKey::new(handle.clone(), timestamp_ms))
    }

    /// Evict all memory entries and delete all disk entries.
    ///
    /// Generations already running return their image to their caller but do
    /// not write it back into either tier.
    pub fn clear(&self) {
        self.manager.increment_epoch();
        self.memory.clear();
        let removed = self.disk.clear();
        info!("Thumbnail cache cleared ({} disk files)", removed);
    }

    /// Number of backend invocations so far.
    pub fn generation_count(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        self.memory.stats()
    }

    /// Memory tier (bytes used, byte limit)
    pub fn mem(&self) -> (usize, usize) {
        self.memory.mem()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn disk_dir(&self) -> &Path {
        self.disk.dir()
    }

    pub fn default_timestamp_ms(&self) -> u64 {
        self.default_timestamp_ms
    }

    #[cfg(test)]
    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Counting backend with optional delay and scripted failures.
    #[derive(Default)]
    struct TestGenerator {
        calls: AtomicUsize,
        delay: Duration,
        /// Number of leading calls that fail
        fail_first: AtomicUsize,
        /// Locators that always fail
        broken: HashSet<String>,
    }

    impl TestGenerator {
        fn slow(delay: Duration) -> Self {
            Self { delay, ..Default::default() }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ThumbnailGenerator for TestGenerator {
        fn generate(&self, handle: &VideoHandle, timestamp_ms: u64) -> Result<RgbaImage, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if self.broken.contains(handle.id()) {
                return Err(FeedError::generation(handle.id(), "cannot open"));
            }
            let failing = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(FeedError::generation(handle.id(), "transient"));
            }
            let shade = (timestamp_ms % 251) as u8;
            Ok(RgbaImage::from_pixel(16, 9, Rgba([shade, 80, 160, 255])))
        }
    }

    fn cache_in(dir: &Path, generator: Arc<TestGenerator>) -> ThumbnailCache {
        ThumbnailCache::new(dir, Arc::new(CacheManager::with_limit(64 << 20)), generator)
    }

    fn video(name: &str) -> VideoHandle {
        VideoHandle::new(format!("/videos/{name}.mp4"))
    }

    #[test]
    fn test_second_get_is_a_hit_without_generation() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator::default());
        let cache = cache_in(dir.path(), Arc::clone(&generator));

        let first = cache.get(&video("a")).unwrap();
        let second = cache.get(&video("a")).unwrap();

        assert_eq!(generator.calls(), 1);
        assert!(first.same_image(&second));
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_concurrent_gets_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator::slow(Duration::from_millis(150)));
        let cache = cache_in(dir.path(), Arc::clone(&generator));
        let handle = video("shared");

        let results: Vec<Option<Thumbnail>> = thread::scope(|s| {
            let workers: Vec<_> = (0..8).map(|_| s.spawn(|| cache.get(&handle))).collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(generator.calls(), 1);
        let first = results[0].as_ref().unwrap();
        for thumb in &results {
            assert!(thumb.as_ref().unwrap().same_image(first));
        }
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[test]
    fn test_late_claim_reads_disk_after_memory_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator::slow(Duration::from_millis(60)));
        // Zero budget: every thumbnail is evicted from memory as soon as it lands
        let cache = ThumbnailCache::new(dir.path(), Arc::new(CacheManager::with_limit(0)), generator.clone());
        let handle = video("evicted");

        thread::scope(|s| {
            for i in 0..8u64 {
                let cache = &cache;
                let handle = &handle;
                s.spawn(move || {
                    thread::sleep(Duration::from_millis(i * 15));
                    assert!(cache.get(handle).is_some());
                });
            }
        });

        assert_eq!(generator.calls(), 1);
        assert_eq!(cache.memory_len(), 0);
        assert!(cache.cache_locator(&handle).is_some());
    }

    #[test]
    fn test_failure_is_not_cached_and_marker_released() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator {
            fail_first: AtomicUsize::new(1),
            ..Default::default()
        });
        let cache = cache_in(dir.path(), Arc::clone(&generator));

        let err = cache.try_get_at(&video("a"), 1000).unwrap_err();
        assert!(matches!(err, FeedError::GenerationFailed { .. }));
        assert_eq!(cache.in_flight_len(), 0);
        assert!(cache.cache_locator(&video("a")).is_none());

        // Transient failure succeeds on retry
        assert!(cache.get(&video("a")).is_some());
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn test_disk_tier_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first_gen = Arc::new(TestGenerator::default());
        {
            let cache = cache_in(dir.path(), Arc::clone(&first_gen));
            cache.get(&video("a")).unwrap();
            assert!(cache.cache_locator(&video("a")).is_some());
        }

        let second_gen = Arc::new(TestGenerator::default());
        let cache = cache_in(dir.path(), Arc::clone(&second_gen));
        let thumb = cache.get(&video("a")).unwrap();

        assert_eq!(second_gen.calls(), 0);
        assert_eq!((thumb.width(), thumb.height()), (16, 9));
        assert_eq!(cache.memory_len(), 1);
    }

    #[test]
    fn test_timestamps_are_separate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator::default());
        let cache = cache_in(dir.path(), Arc::clone(&generator));

        cache.get_at(&video("a"), 1000).unwrap();
        cache.get_at(&video("a"), 5000).unwrap();
        assert_eq!(generator.calls(), 2);
        assert!(cache.cache_locator_at(&video("a"), 5000).is_some());
        assert_ne!(
            cache.cache_locator_at(&video("a"), 1000),
            cache.cache_locator_at(&video("a"), 5000)
        );
    }

    #[test]
    fn test_stuck_marker_falls_through_after_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator::default());
        let cache = cache_in(dir.path(), Arc::clone(&generator)).with_wait(InFlightWait {
            poll: Duration::from_millis(10),
            ceiling: Duration::from_millis(60),
        });

        // Simulate a generator that died without clearing its marker
        let key = ThumbnailKey::new(video("a"), DEFAULT_TIMESTAMP_MS);
        cache.in_flight.lock().unwrap().insert(key);

        let started = Instant::now();
        assert!(cache.get(&video("a")).is_some());
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(generator.calls(), 1);
    }

    #[test]
    fn test_clear_removes_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator::default());
        let cache = cache_in(dir.path(), Arc::clone(&generator));

        cache.get(&video("a")).unwrap();
        cache.clear();

        assert_eq!(cache.memory_len(), 0);
        assert!(cache.cache_locator(&video("a")).is_none());
        cache.get(&video("a")).unwrap();
        assert_eq!(generator.calls(), 2);
    }

    #[test]
    fn test_clear_during_generation_does_not_resurrect() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator::slow(Duration::from_millis(200)));
        let cache = cache_in(dir.path(), Arc::clone(&generator));

        let result = thread::scope(|s| {
            let pending = s.spawn(|| cache.get(&video("a")));
            thread::sleep(Duration::from_millis(50));
            cache.clear();
            pending.join().unwrap()
        });

        // Caller still gets its image
        assert!(result.is_some());
        assert_eq!(cache.memory_len(), 0);
        assert!(cache.cache_locator(&video("a")).is_none());
    }

    #[test]
    fn test_pre_cache_swallows_failures() {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(TestGenerator {
            broken: HashSet::from([video("bad").id().to_string()]),
            ..Default::default()
        });
        let cache = cache_in(dir.path(), Arc::clone(&generator));

        let available = cache.pre_cache(&[video("a"), video("bad"), video("b")]);

        assert_eq!(available, 2);
        assert!(cache.cache_locator(&video("a")).is_some());
        assert!(cache.cache_locator(&video("b")).is_some());
        assert!(cache.cache_locator(&video("bad")).is_none());
    }

    #[test]
    fn test_disk_write_failure_keeps_memory_tier() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let generator = Arc::new(TestGenerator::default());
        let cache = cache_in(&blocker.join("thumbs"), Arc::clone(&generator));

        assert!(cache.get(&video("a")).is_some());
        assert!(cache.get(&video("a")).is_some());
        assert_eq!(generator.calls(), 1);
        assert!(cache.cache_locator(&video("a")).is_none());
    }
}
