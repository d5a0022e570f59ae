//! FeedOrchestrator - ties discovery, history, feed order and thumbnails together
//!
//! **Why**: The presentation layer only reports positions and toggles settings;
//! everything else (rebuilding the feed, recording watches, warming thumbnails)
//! is coordinated here.
//!
//! **Used by**: binary, any presentation layer
//!
//! # States
//!
//! ```text
//! Empty --request_discovery--> Loading --inputs gathered--> Ready
//!                                 ^                           |
//!                                 +--- allow-list / child ----+
//!                                      mode / reorder / folder
//! ```
//!
//! # Threads
//!
//! The orchestrator is owned by one presentation thread (`&mut self`).
//! Discovery, history reads and thumbnail generation run on [`Workers`] and
//! report back over a channel; [`FeedOrchestrator::poll`] applies those
//! results in order and returns [`FeedEvent`]s. Each applied change publishes
//! a new immutable [`FeedSnapshot`] to subscribers.
//!
//! Loading results tagged with an older request are dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, info, trace, warn};

use crate::core::feed_list::{AllowList, FeedList};
use crate::core::history::WatchHistoryStore;
use crate::core::infinite::{DEFAULT_LOOKAHEAD, DEFAULT_LOOKBEHIND, InfiniteIndexMapper};
use crate::core::thumb_cache::ThumbnailCache;
use crate::core::workers::Workers;
use crate::discovery::VideoSource;
use crate::entities::{FeedError, VideoHandle};

/// Feed behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Folder name fragment passed to discovery
    pub folder_name: String,
    /// Reorder by watch history on each rebuild
    pub child_mode: bool,
    pub allow_list_enabled: bool,
    pub lookahead: usize,
    pub lookbehind: usize,
    /// Warm the whole feed after each rebuild, not just the window
    pub precache_all: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            folder_name: "ShortsVideos".to_string(),
            child_mode: true,
            allow_list_enabled: true,
            lookahead: DEFAULT_LOOKAHEAD,
            lookbehind: DEFAULT_LOOKBEHIND,
            precache_all: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Nothing requested yet
    Empty,
    Loading,
    /// Feed built (possibly with zero items)
    Ready,
}

/// Immutable view of the feed, replaced on every change.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub state: FeedState,
    pub feed: FeedList,
    pub virtual_position: Option<i64>,
    pub current_index: Option<usize>,
    pub watch_counts: HashMap<VideoHandle, u64>,
    /// Items whose thumbnail is cached
    pub thumbnails_ready: HashSet<VideoHandle>,
    /// User-facing message (e.g. discovery failure, empty folder)
    pub notice: Option<String>,
    /// Incremented on every rebuild
    pub revision: u64,
}

impl FeedSnapshot {
    fn empty() -> Self {
        Self {
            state: FeedState::Empty,
            feed: FeedList::default(),
            virtual_position: None,
            current_index: None,
            watch_counts: HashMap::new(),
            thumbnails_ready: HashSet::new(),
            notice: None,
            revision: 0,
        }
    }

    pub fn current(&self) -> Option<&VideoHandle> {
        self.feed.get(self.current_index?)
    }

    /// Item shown at `virtual_position`.
    pub fn item_at(&self, virtual_position: i64) -> Option<&VideoHandle> {
        let mapper = InfiniteIndexMapper::new(self.feed.len())?;
        self.feed.get(mapper.actual_index(virtual_position))
    }

    /// Rendering key for `virtual_position`: the item's identity.
    pub fn item_key(&self, virtual_position: i64) -> Option<&str> {
        self.item_at(virtual_position).map(VideoHandle::id)
    }

    pub fn watch_count(&self, handle: &VideoHandle) -> u64 {
        self.watch_counts.get(handle).copied().unwrap_or(0)
    }
}

/// Notifications returned from [`FeedOrchestrator::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    StateChanged(FeedState),
    FeedRebuilt { len: usize },
    DiscoveryFailed(FeedError),
    ThumbnailReady(VideoHandle),
    ThumbnailUnavailable(VideoHandle),
    WatchCountsUpdated,
}

/// Result of a reported position change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    pub virtual_position: i64,
    pub actual_index: usize,
    pub handle: VideoHandle,
    /// Neighbors whose thumbnails were requested, ahead first
    pub prefetch: Vec<VideoHandle>,
}

#[derive(Debug, Clone)]
struct Discovery {
    videos: Vec<VideoHandle>,
    allow_list: AllowList,
}

/// Worker → orchestrator
enum Message {
    Loaded {
        request: u64,
        discovery: Result<Discovery, FeedError>,
        recent: Vec<VideoHandle>,
    },
    Thumbnail {
        handle: VideoHandle,
        ok: bool,
    },
    WatchCounts {
        seq: u64,
        counts: HashMap<VideoHandle, u64>,
    },
}

/// Sends a thumbnail job's outcome when dropped, so a job that unwinds
/// still reports failure and the handle can be requested again.
struct ThumbnailReport {
    handle: VideoHandle,
    tx: Sender<Message>,
    ok: bool,
}

impl Drop for ThumbnailReport {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Thumbnail {
            handle: self.handle.clone(),
            ok: self.ok,
        });
    }
}

pub struct FeedOrchestrator {
    config: FeedConfig,
    source: Arc<dyn VideoSource>,
    cache: Arc<ThumbnailCache>,
    history: Arc<WatchHistoryStore>,
    workers: Arc<Workers>,

    tx: Sender<Message>,
    rx: Receiver<Message>,
    /// Latest loading request; older results are stale
    request: u64,
    /// Last successful discovery, reused when only filters or order change
    discovered: Option<Discovery>,
    /// Replaces the allow-list found next to the videos
    allow_list_override: Option<AllowList>,
    /// Thumbnail jobs queued and not yet reported
    requested: HashSet<VideoHandle>,
    /// Last issued watch-count request
    counts_seq: u64,
    /// Count replies at or below this sequence predate a history clear
    counts_floor: u64,
    /// Sequence of the reply each snapshot count came from
    count_seqs: HashMap<VideoHandle, u64>,

    snapshot: Arc<FeedSnapshot>,
    subscribers: Vec<Sender<Arc<FeedSnapshot>>>,
    events: Vec<FeedEvent>,
}

impl std::fmt::Debug for FeedOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedOrchestrator")
            .field("config", &self.config)
            .field("state", &self.snapshot.state)
            .field("items", &self.snapshot.feed.len())
            .field("request", &self.request)
            .finish()
    }
}

impl FeedOrchestrator {
    pub fn new(
        config: FeedConfig,
        source: Arc<dyn VideoSource>,
        cache: Arc<ThumbnailCache>,
        history: Arc<WatchHistoryStore>,
        workers: Arc<Workers>,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            config,
            source,
            cache,
            history,
            workers,
            tx,
            rx,
            request: 0,
            discovered: None,
            allow_list_override: None,
            requested: HashSet::new(),
            counts_seq: 0,
            counts_floor: 0,
            count_seqs: HashMap::new(),
            snapshot: Arc::new(FeedSnapshot::empty()),
            subscribers: Vec::new(),
            events: Vec::new(),
        }
    }

    // ========== Queries ==========

    pub fn state(&self) -> FeedState {
        self.snapshot.state
    }

    pub fn snapshot(&self) -> Arc<FeedSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ThumbnailCache> {
        &self.cache
    }

    pub fn history(&self) -> &Arc<WatchHistoryStore> {
        &self.history
    }

    /// Receive every new snapshot (current one first).
    pub fn subscribe(&mut self) -> Receiver<Arc<FeedSnapshot>> {
        let (tx, rx) = unbounded();
        let _ = tx.send(self.snapshot());
        self.subscribers.push(tx);
        rx
    }

    // ========== Commands ==========

    /// Discover videos and build the feed (Empty/Ready → Loading).
    pub fn request_discovery(&mut self) {
        self.start_loading(true);
    }

    /// Rebuild with fresh history order (one-shot; no-op before first discovery).
    pub fn request_reorder(&mut self) {
        if self.state() != FeedState::Empty {
            self.start_loading(false);
        }
    }

    pub fn set_allow_list_enabled(&mut self, enabled: bool) {
        if self.config.allow_list_enabled != enabled {
            self.config.allow_list_enabled = enabled;
            info!("Allow-list {}", if enabled { "enabled" } else { "disabled" });
            self.request_reorder();
        }
    }

    /// Use `list` instead of the folder's allow-list file; `None` reverts.
    pub fn set_allow_list(&mut self, list: Option<AllowList>) {
        if self.allow_list_override != list {
            self.allow_list_override = list;
            self.request_reorder();
        }
    }

    pub fn set_child_mode(&mut self, child_mode: bool) {
        if self.config.child_mode != child_mode {
            self.config.child_mode = child_mode;
            info!("Child mode {}", if child_mode { "on" } else { "off" });
            self.request_reorder();
        }
    }

    /// Switch folders; the new feed starts at its first item.
    pub fn set_folder(&mut self, folder_name: impl Into<String>) {
        let folder_name = folder_name.into();
        if self.config.folder_name == folder_name {
            return;
        }
        info!("Feed folder: {}", folder_name);
        self.config.folder_name = folder_name;
        self.discovered = None;
        if self.state() != FeedState::Empty {
            let mut snapshot = (*self.snapshot).clone();
            snapshot.virtual_position = None;
            snapshot.current_index = None;
            self.snapshot = Arc::new(snapshot);
            self.start_loading(true);
        }
    }

    /// Delete every cached thumbnail, then re-warm the current window.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.requested.clear();
        if !self.snapshot.thumbnails_ready.is_empty() {
            let mut snapshot = (*self.snapshot).clone();
            snapshot.thumbnails_ready.clear();
            self.snapshot = Arc::new(snapshot);
            self.publish();
        }
        if self.state() == FeedState::Ready {
            self.request_window();
        }
    }

    /// Wipe watch history; the snapshot's counts drop to zero.
    ///
    /// Feed order is unchanged until the next rebuild.
    pub fn clear_history(&mut self) -> Result<(), FeedError> {
        self.history.clear_all()?;
        self.counts_floor = self.counts_seq;
        self.count_seqs.clear();
        let mut snapshot = (*self.snapshot).clone();
        snapshot.watch_counts.clear();
        self.snapshot = Arc::new(snapshot);
        self.events.push(FeedEvent::WatchCountsUpdated);
        self.publish();
        Ok(())
    }

    /// Presentation layer moved to `virtual_position`.
    ///
    /// Records a watch and requests thumbnails for the neighbor window.
    /// `None` unless the feed is Ready and non-empty.
    pub fn on_position_changed(&mut self, virtual_position: i64) -> Option<PositionUpdate> {
        if self.state() != FeedState::Ready {
            return None;
        }
        let mapper = InfiniteIndexMapper::new(self.snapshot.feed.len())?;
        let actual_index = mapper.actual_index(virtual_position);
        let handle = self.snapshot.feed.get(actual_index)?.clone();

        self.history.record_watched(&handle);

        let prefetch: Vec<VideoHandle> = mapper
            .window(virtual_position, self.config.lookahead, self.config.lookbehind)
            .into_iter()
            .filter_map(|i| self.snapshot.feed.get(i).cloned())
            .collect();

        self.request_thumbnail(&handle);
        for neighbor in &prefetch {
            self.request_thumbnail(neighbor);
        }
        self.refresh_watch_counts(vec![handle.clone()]);

        let mut snapshot = (*self.snapshot).clone();
        snapshot.virtual_position = Some(virtual_position);
        snapshot.current_index = Some(actual_index);
        self.snapshot = Arc::new(snapshot);
        self.publish();

        trace!("Position {} -> [{}] {}", virtual_position, actual_index, handle);
        Some(PositionUpdate {
            virtual_position,
            actual_index,
            handle,
            prefetch,
        })
    }

    // ========== Message pump ==========

    /// Apply finished background work; returns resulting events.
    pub fn poll(&mut self) -> Vec<FeedEvent> {
        while let Ok(msg) = self.rx.try_recv() {
            self.apply(msg);
        }
        std::mem::take(&mut self.events)
    }

    /// Like [`poll`](Self::poll), but waits up to `timeout` for the first message.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Vec<FeedEvent> {
        if self.events.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(msg) => self.apply(msg),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }
        self.poll()
    }

    /// Pump until Ready or `timeout`. Returns true if Ready.
    pub fn wait_ready(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while self.state() != FeedState::Ready {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            events.extend(self.poll_timeout(deadline - now));
        }
        // Keep events for the caller's next poll
        events.append(&mut self.events);
        self.events = events;
        self.state() == FeedState::Ready
    }

    /// Wait for all queued background work, then apply it.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<FeedEvent> {
        if !self.workers.wait_idle(timeout) {
            debug!("Background work still running after {:?}", timeout);
        }
        self.poll()
    }

    // ========== Internals ==========

    fn start_loading(&mut self, rediscover: bool) {
        self.request += 1;
        let request = self.request;

        let cached = if rediscover { None } else { self.discovered.clone() };
        let source = Arc::clone(&self.source);
        let history = Arc::clone(&self.history);
        let folder = self.config.folder_name.clone();
        let child_mode = self.config.child_mode;
        let tx = self.tx.clone();

        debug!(
            "Loading feed #{} (folder={}, rediscover={}, child_mode={})",
            request,
            folder,
            cached.is_none(),
            child_mode
        );
        self.workers.execute(move || {
            let discovery = match cached {
                Some(discovery) => Ok(discovery),
                None => source.discover(&folder).map(|videos| Discovery {
                    videos,
                    allow_list: source.allow_list(&folder),
                }),
            };
            let recent = if child_mode { history.recently_watched() } else { Vec::new() };
            let _ = tx.send(Message::Loaded { request, discovery, recent });
        });

        if self.state() != FeedState::Loading {
            let mut snapshot = (*self.snapshot).clone();
            snapshot.state = FeedState::Loading;
            self.snapshot = Arc::new(snapshot);
            self.events.push(FeedEvent::StateChanged(FeedState::Loading));
            self.publish();
        }
    }

    fn apply(&mut self, msg: Message) {
        match msg {
            Message::Loaded { request, discovery, recent } => {
                if request != self.request {
                    trace!("Dropping stale feed load #{} (current #{})", request, self.request);
                    return;
                }
                match discovery {
                    Ok(discovery) => self.rebuild(discovery, &recent),
                    Err(e) => self.discovery_failed(e),
                }
            }
            Message::Thumbnail { handle, ok } => {
                self.requested.remove(&handle);
                if !self.snapshot.feed.iter().any(|h| h == &handle) {
                    return;
                }
                let mut snapshot = (*self.snapshot).clone();
                if ok {
                    snapshot.thumbnails_ready.insert(handle.clone());
                    self.events.push(FeedEvent::ThumbnailReady(handle));
                } else {
                    snapshot.thumbnails_ready.remove(&handle);
                    self.events.push(FeedEvent::ThumbnailUnavailable(handle));
                }
                self.snapshot = Arc::new(snapshot);
                self.publish();
            }
            Message::WatchCounts { seq, counts } => {
                if seq <= self.counts_floor {
                    trace!("Dropping watch counts #{} from before history clear", seq);
                    return;
                }
                // Replies may arrive out of order; keep the newest per handle
                let mut snapshot = (*self.snapshot).clone();
                for (handle, count) in counts {
                    let applied = self.count_seqs.entry(handle.clone()).or_insert(0);
                    if *applied < seq {
                        *applied = seq;
                        snapshot.watch_counts.insert(handle, count);
                    }
                }
                self.snapshot = Arc::new(snapshot);
                self.events.push(FeedEvent::WatchCountsUpdated);
                self.publish();
            }
        }
    }

    fn rebuild(&mut self, discovery: Discovery, recent: &[VideoHandle]) {
        let allow_list = self
            .allow_list_override
            .as_ref()
            .unwrap_or(&discovery.allow_list);
        let feed = FeedList::build(
            &discovery.videos,
            self.config.allow_list_enabled,
            allow_list,
            recent,
        );

        let notice = if discovery.videos.is_empty() {
            Some(format!("No videos found in folder \"{}\"", self.config.folder_name))
        } else if feed.is_empty() {
            Some("No videos match the allow-list".to_string())
        } else {
            None
        };

        let mapper = InfiniteIndexMapper::new(feed.len());
        let virtual_position = match mapper {
            Some(m) => Some(self.snapshot.virtual_position.unwrap_or_else(|| m.start_position())),
            None => self.snapshot.virtual_position,
        };
        let current_index = mapper.zip(virtual_position).map(|(m, v)| m.actual_index(v));

        let previous = &self.snapshot;
        let thumbnails_ready = previous
            .thumbnails_ready
            .iter()
            .filter(|h| feed.position(h).is_some())
            .cloned()
            .collect();

        info!(
            "Feed ready: {} of {} videos (allow-list {}, history {})",
            feed.len(),
            discovery.videos.len(),
            if self.config.allow_list_enabled { "on" } else { "off" },
            if self.config.child_mode { "on" } else { "off" }
        );

        self.snapshot = Arc::new(FeedSnapshot {
            state: FeedState::Ready,
            feed,
            virtual_position,
            current_index,
            watch_counts: previous.watch_counts.clone(),
            thumbnails_ready,
            notice,
            revision: previous.revision + 1,
        });
        self.discovered = Some(discovery);

        self.events.push(FeedEvent::FeedRebuilt { len: self.snapshot.feed.len() });
        self.events.push(FeedEvent::StateChanged(FeedState::Ready));
        self.publish();
        self.warm_up();
    }

    fn discovery_failed(&mut self, err: FeedError) {
        warn!("{}", err);
        self.discovered = None;
        let previous = &self.snapshot;
        self.snapshot = Arc::new(FeedSnapshot {
            state: FeedState::Ready,
            feed: FeedList::default(),
            virtual_position: previous.virtual_position,
            current_index: None,
            watch_counts: HashMap::new(),
            thumbnails_ready: HashSet::new(),
            notice: Some(format!("{}. Grant access to your videos and try again.", err)),
            revision: previous.revision + 1,
        });
        self.events.push(FeedEvent::DiscoveryFailed(err));
        self.events.push(FeedEvent::FeedRebuilt { len: 0 });
        self.events.push(FeedEvent::StateChanged(FeedState::Ready));
        self.publish();
    }

    /// Thumbnails around the current position, watch counts, optional full warm-up.
    fn warm_up(&mut self) {
        self.request_window();

        let snapshot = Arc::clone(&self.snapshot);
        self.refresh_watch_counts(snapshot.feed.items().to_vec());

        if self.config.precache_all {
            let remaining: Vec<VideoHandle> = snapshot
                .feed
                .iter()
                .filter(|h| !self.requested.contains(*h))
                .cloned()
                .collect();
            debug!("Pre-caching {} thumbnails", remaining.len());
            let cache = Arc::clone(&self.cache);
            let tx = self.tx.clone();
            self.workers.execute(move || {
                for handle in remaining {
                    let mut report = ThumbnailReport { handle, tx: tx.clone(), ok: false };
                    report.ok = cache.pre_cache(std::slice::from_ref(&report.handle)) == 1;
                }
            });
        }
    }

    /// Current item plus its neighbor window.
    fn request_window(&mut self) {
        let snapshot = Arc::clone(&self.snapshot);
        let Some(mapper) = InfiniteIndexMapper::new(snapshot.feed.len()) else {
            return;
        };
        let Some(v) = snapshot.virtual_position else {
            return;
        };
        let current = mapper.actual_index(v);
        let window = mapper.window(v, self.config.lookahead, self.config.lookbehind);
        for index in std::iter::once(current).chain(window) {
            if let Some(handle) = snapshot.feed.get(index) {
                self.request_thumbnail(handle);
            }
        }
    }

    /// Queue `handle` unless a job for it is outstanding. Cached thumbnails
    /// resolve from memory or disk without decoding.
    fn request_thumbnail(&mut self, handle: &VideoHandle) {
        if !self.requested.insert(handle.clone()) {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let mut report = ThumbnailReport {
            handle: handle.clone(),
            tx: self.tx.clone(),
            ok: false,
        };
        self.workers.execute(move || {
            report.ok = cache.pre_cache(std::slice::from_ref(&report.handle)) == 1;
        });
    }

    fn refresh_watch_counts(&mut self, handles: Vec<VideoHandle>) {
        if handles.is_empty() {
            return;
        }
        self.counts_seq += 1;
        let seq = self.counts_seq;
        let history = Arc::clone(&self.history);
        let tx = self.tx.clone();
        self.workers.execute(move || {
            let counts = history.watch_counts(&handles);
            let _ = tx.send(Message::WatchCounts { seq, counts });
        });
    }

    fn publish(&mut self) {
        let snapshot = &self.snapshot;
        self.subscribers.retain(|tx| tx.send(Arc::clone(snapshot)).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_man::CacheManager;
    use crate::core::generator::ThumbnailGenerator;
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;

    const WAIT: Duration = Duration::from_secs(5);

    /// Scripted discovery result per folder; unknown folders are empty.
    struct ScriptedSource {
        folders: HashMap<String, (Duration, Result<Vec<VideoHandle>, FeedError>)>,
        allow_list: AllowList,
    }

    impl ScriptedSource {
        fn with(videos: Vec<VideoHandle>) -> Self {
            Self::script(vec![("ShortsVideos", Duration::ZERO, Ok(videos))])
        }

        fn script(entries: Vec<(&str, Duration, Result<Vec<VideoHandle>, FeedError>)>) -> Self {
            Self {
                folders: entries
                    .into_iter()
                    .map(|(folder, delay, result)| (folder.to_string(), (delay, result)))
                    .collect(),
                allow_list: AllowList::default(),
            }
        }
    }

    impl VideoSource for ScriptedSource {
        fn discover(&self, folder: &str) -> Result<Vec<VideoHandle>, FeedError> {
            match self.folders.get(folder) {
                Some((delay, result)) => {
                    std::thread::sleep(*delay);
                    result.clone()
                }
                None => Ok(Vec::new()),
            }
        }

        fn allow_list(&self, _folder: &str) -> AllowList {
            self.allow_list.clone()
        }
    }

    /// Solid-color frames; records which videos were decoded.
    #[derive(Default)]
    struct RecordingGenerator {
        seen: Mutex<Vec<VideoHandle>>,
        /// Panics on the first decode of this video
        crash_once: Mutex<Option<VideoHandle>>,
    }

    impl ThumbnailGenerator for RecordingGenerator {
        fn generate(&self, handle: &VideoHandle, _timestamp_ms: u64) -> Result<RgbaImage, FeedError> {
            let crash = {
                let mut crash_once = self.crash_once.lock().unwrap();
                if crash_once.as_ref() == Some(handle) {
                    crash_once.take();
                    true
                } else {
                    false
                }
            };
            if crash {
                panic!("decoder crashed on {handle}");
            }
            self.seen.lock().unwrap().push(handle.clone());
            Ok(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255])))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        history: Arc<WatchHistoryStore>,
        generator: Arc<RecordingGenerator>,
        orchestrator: FeedOrchestrator,
    }

    fn fixture(source: ScriptedSource, config: FeedConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(RecordingGenerator::default());
        let cache = Arc::new(ThumbnailCache::new(
            dir.path().join("thumbs"),
            Arc::new(CacheManager::with_limit(16 << 20)),
            generator.clone(),
        ));
        let history = Arc::new(WatchHistoryStore::in_memory());
        let orchestrator = FeedOrchestrator::new(
            config,
            Arc::new(source),
            cache,
            Arc::clone(&history),
            Arc::new(Workers::new(3)),
        );
        Fixture {
            _dir: dir,
            history,
            generator,
            orchestrator,
        }
    }

    fn plain_config() -> FeedConfig {
        FeedConfig {
            child_mode: false,
            allow_list_enabled: false,
            ..FeedConfig::default()
        }
    }

    fn videos(names: &[&str]) -> Vec<VideoHandle> {
        names.iter().map(|n| VideoHandle::new(format!("/sdcard/ShortsVideos/{n}.mp4"))).collect()
    }

    #[test]
    fn test_first_position_records_and_prefetches() {
        let all = videos(&["v1", "v2", "v3", "v4", "v5"]);
        let mut fx = fixture(ScriptedSource::with(all.clone()), plain_config());
        let orch = &mut fx.orchestrator;

        assert_eq!(orch.state(), FeedState::Empty);
        orch.request_discovery();
        assert_eq!(orch.state(), FeedState::Loading);
        assert!(orch.wait_ready(WAIT));

        let snapshot = orch.snapshot();
        assert_eq!(snapshot.feed.items(), all.as_slice());
        assert_eq!(snapshot.current_index, Some(0));

        let start = snapshot.virtual_position.unwrap();
        let update = orch.on_position_changed(start).unwrap();
        assert_eq!(update.actual_index, 0);
        assert_eq!(update.handle, all[0]);
        assert_eq!(update.prefetch, vec![all[1].clone(), all[2].clone(), all[3].clone(), all[4].clone()]);

        orch.wait_idle(WAIT);
        assert_eq!(fx.history.watch_count(&all[0]), 1);
        assert_eq!(fx.history.watch_count(&all[1]), 0);

        let snapshot = fx.orchestrator.snapshot();
        assert_eq!(snapshot.watch_count(&all[0]), 1);
        for handle in &all {
            assert!(snapshot.thumbnails_ready.contains(handle), "{handle}");
        }
        // Each thumbnail decoded once despite warm-up and prefetch overlapping
        assert_eq!(fx.generator.seen.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_discovery_failure_gives_empty_ready_feed() {
        let source = ScriptedSource::script(vec![(
            "ShortsVideos",
            Duration::ZERO,
            Err(FeedError::DiscoveryUnavailable("permission denied".into())),
        )]);
        let mut fx = fixture(source, plain_config());
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        let events = orch.poll();

        assert!(events.iter().any(|e| matches!(e, FeedEvent::DiscoveryFailed(_))));
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.state, FeedState::Ready);
        assert!(snapshot.feed.is_empty());
        assert!(snapshot.notice.is_some());
        assert!(orch.on_position_changed(0).is_none());
    }

    #[test]
    fn test_empty_folder_is_ready_not_empty() {
        let mut fx = fixture(ScriptedSource::with(Vec::new()), plain_config());
        fx.orchestrator.request_discovery();
        assert!(fx.orchestrator.wait_ready(WAIT));
        let snapshot = fx.orchestrator.snapshot();
        assert_eq!(snapshot.state, FeedState::Ready);
        assert!(snapshot.notice.as_deref().unwrap().contains("No videos found"));
    }

    #[test]
    fn test_allow_list_toggle_rebuilds() {
        let mut source = ScriptedSource::with(videos(&["cat_a", "dog", "cat_b"]));
        source.allow_list = AllowList::new(["cat"]);
        let config = FeedConfig {
            allow_list_enabled: true,
            ..plain_config()
        };
        let mut fx = fixture(source, config);
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        assert_eq!(orch.snapshot().feed.items(), videos(&["cat_a", "cat_b"]).as_slice());

        orch.set_allow_list_enabled(false);
        assert_eq!(orch.state(), FeedState::Loading);
        assert!(orch.wait_ready(WAIT));
        assert_eq!(orch.snapshot().feed.len(), 3);

        // Override replaces the folder's list
        orch.set_allow_list_enabled(true);
        orch.set_allow_list(Some(AllowList::new(["DOG"])));
        assert!(orch.wait_ready(WAIT));
        assert_eq!(orch.snapshot().feed.items(), videos(&["dog"]).as_slice());
    }

    #[test]
    fn test_child_mode_reorders_once_per_rebuild() {
        let all = videos(&["A", "B", "C", "D"]);
        let config = FeedConfig {
            child_mode: true,
            ..plain_config()
        };
        let mut fx = fixture(ScriptedSource::with(all.clone()), config);
        fx.history.record_watched(&all[0]);
        fx.history.record_watched(&all[2]);

        let orch = &mut fx.orchestrator;
        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        assert_eq!(orch.snapshot().feed.items(), videos(&["C", "A", "B", "D"]).as_slice());

        // Watching B does not move it while Ready
        let start = orch.snapshot().virtual_position.unwrap();
        orch.on_position_changed(start + 2).unwrap();
        orch.wait_idle(WAIT);
        assert_eq!(orch.snapshot().feed.items(), videos(&["C", "A", "B", "D"]).as_slice());

        orch.request_reorder();
        assert!(orch.wait_ready(WAIT));
        assert_eq!(orch.snapshot().feed.items(), videos(&["B", "C", "A", "D"]).as_slice());
    }

    #[test]
    fn test_history_ignored_without_child_mode() {
        let all = videos(&["A", "B", "C"]);
        let mut fx = fixture(ScriptedSource::with(all.clone()), plain_config());
        fx.history.record_watched(&all[2]);

        fx.orchestrator.request_discovery();
        assert!(fx.orchestrator.wait_ready(WAIT));
        assert_eq!(fx.orchestrator.snapshot().feed.items(), all.as_slice());
    }

    #[test]
    fn test_stale_discovery_is_dropped() {
        let source = ScriptedSource::script(vec![
            ("ShortsVideos", Duration::from_millis(200), Ok(videos(&["old"]))),
            ("Other", Duration::ZERO, Ok(videos(&["new1", "new2"]))),
        ]);
        let mut fx = fixture(source, plain_config());
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        orch.set_folder("Other");
        orch.wait_idle(WAIT);

        assert_eq!(orch.state(), FeedState::Ready);
        assert_eq!(orch.snapshot().feed.items(), videos(&["new1", "new2"]).as_slice());
    }

    #[test]
    fn test_shrinking_feed_keeps_valid_index() {
        let mut source = ScriptedSource::with(videos(&["a1", "b1", "a2", "b2", "b3"]));
        source.allow_list = AllowList::new(["a"]);
        let mut fx = fixture(source, plain_config());
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        let start = orch.snapshot().virtual_position.unwrap();
        orch.on_position_changed(start + 4).unwrap();

        orch.set_allow_list_enabled(true);
        assert!(orch.wait_ready(WAIT));
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.feed.len(), 2);
        assert_eq!(snapshot.virtual_position, Some(start + 4));
        assert!(snapshot.current_index.unwrap() < 2);
        assert!(snapshot.current().is_some());
    }

    #[test]
    fn test_subscribers_receive_snapshots() {
        let mut fx = fixture(ScriptedSource::with(videos(&["x", "y"])), plain_config());
        let orch = &mut fx.orchestrator;
        let rx = orch.subscribe();

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));

        let states: Vec<FeedState> = rx.try_iter().map(|s| s.state).collect();
        assert_eq!(states.first(), Some(&FeedState::Empty));
        assert!(states.contains(&FeedState::Loading));
        assert_eq!(states.last(), Some(&FeedState::Ready));
    }

    #[test]
    fn test_setters_before_discovery_do_not_load() {
        let mut fx = fixture(ScriptedSource::with(videos(&["x"])), plain_config());
        let orch = &mut fx.orchestrator;
        orch.set_child_mode(true);
        orch.set_allow_list_enabled(true);
        orch.request_reorder();
        assert_eq!(orch.state(), FeedState::Empty);
        assert!(orch.on_position_changed(0).is_none());
    }

    #[test]
    fn test_item_key_is_identity() {
        let all = videos(&["a", "b", "c"]);
        let mut fx = fixture(ScriptedSource::with(all.clone()), plain_config());
        fx.orchestrator.request_discovery();
        assert!(fx.orchestrator.wait_ready(WAIT));

        let snapshot = fx.orchestrator.snapshot();
        let start = snapshot.virtual_position.unwrap();
        assert_eq!(snapshot.item_key(start + 1), Some(all[1].id()));
        assert_eq!(snapshot.item_key(start + 4), snapshot.item_key(start + 1));
        assert_eq!(snapshot.item_key(start - 1), Some(all[2].id()));
    }

    #[test]
    fn test_position_change_regenerates_after_cache_clear() {
        let all = videos(&["v1", "v2", "v3", "v4", "v5"]);
        let mut fx = fixture(ScriptedSource::with(all.clone()), plain_config());
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        let start = orch.snapshot().virtual_position.unwrap();
        orch.on_position_changed(start).unwrap();
        orch.wait_idle(WAIT);
        assert_eq!(fx.generator.seen.lock().unwrap().len(), 5);

        orch.cache().clear();
        orch.on_position_changed(start + 1).unwrap();
        orch.wait_idle(WAIT);

        // Window around v2 spans the whole feed
        assert_eq!(fx.generator.seen.lock().unwrap().len(), 10);
        for handle in &all {
            assert!(orch.cache().cache_locator(handle).is_some(), "{handle}");
        }
    }

    #[test]
    fn test_clear_cache_resets_ready_and_rewarms() {
        let all = videos(&["v1", "v2", "v3", "v4", "v5"]);
        let mut fx = fixture(ScriptedSource::with(all.clone()), plain_config());
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        orch.wait_idle(WAIT);
        assert_eq!(orch.snapshot().thumbnails_ready.len(), 5);

        orch.clear_cache();
        assert!(orch.snapshot().thumbnails_ready.is_empty());

        orch.wait_idle(WAIT);
        let snapshot = orch.snapshot();
        assert_eq!(fx.generator.seen.lock().unwrap().len(), 10);
        for handle in &all {
            assert!(snapshot.thumbnails_ready.contains(handle), "{handle}");
        }
    }

    #[test]
    fn test_rediscovery_picks_up_cleared_history() {
        let all = videos(&["v1", "v2", "v3"]);
        let mut fx = fixture(ScriptedSource::with(all.clone()), plain_config());
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        let start = orch.snapshot().virtual_position.unwrap();
        orch.on_position_changed(start).unwrap();
        orch.wait_idle(WAIT);
        assert_eq!(orch.snapshot().watch_count(&all[0]), 1);

        fx.history.clear_all().unwrap();
        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        orch.wait_idle(WAIT);

        assert_eq!(fx.history.watch_count(&all[0]), 0);
        assert_eq!(orch.snapshot().watch_count(&all[0]), 0);
    }

    #[test]
    fn test_clear_history_drops_in_flight_counts() {
        let all = videos(&["v1", "v2", "v3"]);
        let mut fx = fixture(ScriptedSource::with(all.clone()), plain_config());
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        let start = orch.snapshot().virtual_position.unwrap();
        orch.on_position_changed(start).unwrap();
        orch.wait_idle(WAIT);

        // Count refresh for v2 may still be queued when history is wiped
        orch.on_position_changed(start + 1).unwrap();
        orch.clear_history().unwrap();
        assert_eq!(orch.snapshot().watch_count(&all[0]), 0);

        let events = orch.wait_idle(WAIT);
        assert!(events.contains(&FeedEvent::WatchCountsUpdated));
        let snapshot = orch.snapshot();
        for handle in &all {
            assert_eq!(snapshot.watch_count(handle), 0, "{handle}");
            assert_eq!(fx.history.watch_count(handle), 0, "{handle}");
        }

        // Later watches count from zero
        orch.on_position_changed(start).unwrap();
        orch.wait_idle(WAIT);
        assert_eq!(orch.snapshot().watch_count(&all[0]), 1);
    }

    #[test]
    fn test_panicking_generation_reports_and_retries() {
        let all = videos(&["p", "q"]);
        let mut fx = fixture(ScriptedSource::with(all.clone()), plain_config());
        *fx.generator.crash_once.lock().unwrap() = Some(all[0].clone());
        let orch = &mut fx.orchestrator;

        orch.request_discovery();
        assert!(orch.wait_ready(WAIT));
        let events = orch.wait_idle(WAIT);
        assert!(events.contains(&FeedEvent::ThumbnailUnavailable(all[0].clone())));
        assert!(!orch.snapshot().thumbnails_ready.contains(&all[0]));
        assert_eq!(orch.cache().in_flight_len(), 0);

        let start = orch.snapshot().virtual_position.unwrap();
        orch.on_position_changed(start).unwrap();
        let events = orch.wait_idle(WAIT);
        assert!(events.contains(&FeedEvent::ThumbnailReady(all[0].clone())));
        assert!(orch.snapshot().thumbnails_ready.contains(&all[0]));
    }
}
