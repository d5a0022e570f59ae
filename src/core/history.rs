//! Watch history - recency list plus per-video counters
//!
//! **Why**: Child mode reorders the feed so recently watched videos come first,
//! and the feed shows how often each video was watched.
//!
//! **Used by**: FeedOrchestrator (record on position change, reorder, badges)
//!
//! # Single writer
//!
//! All reads and writes go through one actor thread that owns the
//! [`PrefsStore`]. Commands are processed in send order, so increments are
//! never lost and a query always sees every watch recorded before it.
//!
//! # Persisted layout
//!
//! ```text
//! last_watched_videos          ["/v/b.mp4", "/v/a.mp4", ...]  most recent first, max 50
//! watch_count_<locator>        3
//! last_watched_time_<locator>  "2026-10-19T08:15:00+00:00"
//! ```
//!
//! If the backing file cannot be opened or written, history degrades: records
//! are dropped with a warning and queries return empty defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, error, info, warn};
use serde_json::{Value, json};

use crate::core::prefs::PrefsStore;
use crate::entities::{FeedError, VideoHandle};

/// Maximum length of the recency list
pub const RECENT_LIMIT: usize = 50;

const RECENT_KEY: &str = "last_watched_videos";
const COUNT_PREFIX: &str = "watch_count_";
const TIME_PREFIX: &str = "last_watched_time_";

enum Command {
    Record(VideoHandle, DateTime<Utc>),
    Count(VideoHandle, Sender<u64>),
    Counts(Vec<VideoHandle>, Sender<HashMap<VideoHandle, u64>>),
    Recent(Sender<Vec<VideoHandle>>),
    LastWatched(VideoHandle, Sender<Option<DateTime<Utc>>>),
    Clear(Sender<Result<(), FeedError>>),
    Shutdown,
}

/// Handle to the history actor. Cheap to share behind an `Arc`.
pub struct WatchHistoryStore {
    tx: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WatchHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHistoryStore").finish_non_exhaustive()
    }
}

impl WatchHistoryStore {
    /// Open history persisted at `path`.
    ///
    /// Never fails: an unreadable file gives a degraded (no-op) store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let prefs = match PrefsStore::open(&path) {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                let err = FeedError::HistoryStoreUnavailable(format!("{:#}", e));
                warn!("{}; watch history disabled", err);
                None
            }
        };
        Self::spawn(prefs)
    }

    /// History kept only for this process.
    pub fn in_memory() -> Self {
        Self::spawn(Some(PrefsStore::in_memory()))
    }

    fn spawn(prefs: Option<PrefsStore>) -> Self {
        let (tx, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("reels-history".to_string())
            .spawn(move || HistoryActor { prefs }.run(rx));

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                // rx was moved into the failed closure and dropped: every send fails,
                // every query falls back to defaults
                error!("Failed to spawn history thread: {}", e);
                None
            }
        };
        Self { tx, thread }
    }

    /// Record a watch of `handle` now. Fire-and-forget.
    pub fn record_watched(&self, handle: &VideoHandle) {
        self.record_watched_at(handle, Utc::now());
    }

    pub fn record_watched_at(&self, handle: &VideoHandle, at: DateTime<Utc>) {
        if self.tx.send(Command::Record(handle.clone(), at)).is_err() {
            warn!("Watch history unavailable, dropping watch of {}", handle);
        }
    }

    /// Times `handle` was watched (0 if never).
    pub fn watch_count(&self, handle: &VideoHandle) -> u64 {
        self.query(|reply| Command::Count(handle.clone(), reply)).unwrap_or(0)
    }

    /// Counts for many handles in one round trip. Unwatched handles map to 0.
    pub fn watch_counts(&self, handles: &[VideoHandle]) -> HashMap<VideoHandle, u64> {
        self.query(|reply| Command::Counts(handles.to_vec(), reply))
            .unwrap_or_else(|| handles.iter().map(|h| (h.clone(), 0)).collect())
    }

    /// Recency list, most recent first.
    pub fn recently_watched(&self) -> Vec<VideoHandle> {
        self.query(Command::Recent).unwrap_or_default()
    }

    pub fn last_watched(&self, handle: &VideoHandle) -> Option<DateTime<Utc>> {
        self.query(|reply| Command::LastWatched(handle.clone(), reply)).flatten()
    }

    /// Remove the recency list, all counters and all timestamps in one write.
    pub fn clear_all(&self) -> Result<(), FeedError> {
        self.query(Command::Clear).unwrap_or_else(|| {
            Err(FeedError::HistoryStoreUnavailable("history thread not running".into()))
        })
    }

    fn query<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Option<T> {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(make(reply_tx)).is_err() {
            warn!("Watch history unavailable");
            return None;
        }
        reply_rx.recv().ok()
    }
}

impl Drop for WatchHistoryStore {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("History thread panicked");
            }
        }
    }
}

struct HistoryActor {
    /// None = degraded
    prefs: Option<PrefsStore>,
}

impl HistoryActor {
    fn run(mut self, rx: Receiver<Command>) {
        debug!("History thread started");
        while let Ok(cmd) = rx.recv() {
            match cmd {
                Command::Record(handle, at) => {
                    if let Err(e) = self.record(&handle, at) {
                        warn!("{}", e);
                    }
                }
                Command::Count(handle, reply) => {
                    let _ = reply.send(self.count(&handle));
                }
                Command::Counts(handles, reply) => {
                    let counts = handles.into_iter().map(|h| {
                        let n = self.count(&h);
                        (h, n)
                    });
                    let _ = reply.send(counts.collect());
                }
                Command::Recent(reply) => {
                    let _ = reply.send(self.recent().into_iter().map(VideoHandle::new).collect());
                }
                Command::LastWatched(handle, reply) => {
                    let _ = reply.send(self.last_watched(&handle));
                }
                Command::Clear(reply) => {
                    let _ = reply.send(self.clear());
                }
                Command::Shutdown => break,
            }
        }
        debug!("History thread stopped");
    }

    fn recent(&self) -> Vec<String> {
        self.prefs
            .as_ref()
            .and_then(|p| p.get::<Vec<String>>(RECENT_KEY))
            .unwrap_or_default()
    }

    fn count(&self, handle: &VideoHandle) -> u64 {
        self.prefs
            .as_ref()
            .and_then(|p| p.get::<u64>(&count_key(handle)))
            .unwrap_or(0)
    }

    fn last_watched(&self, handle: &VideoHandle) -> Option<DateTime<Utc>> {
        let text: String = self.prefs.as_ref()?.get(&time_key(handle))?;
        DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .ok()
    }

    fn record(&mut self, handle: &VideoHandle, at: DateTime<Utc>) -> Result<(), FeedError> {
        let prefs = self.prefs.as_mut().ok_or_else(unavailable)?;
        let id = handle.id().to_string();
        let count_key = count_key(handle);

        prefs
            .edit(|values| {
                let mut recent: Vec<String> = values
                    .get(RECENT_KEY)
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                recent.retain(|entry| entry != &id);
                recent.insert(0, id.clone());
                recent.truncate(RECENT_LIMIT);

                let count = values.get(&count_key).and_then(Value::as_u64).unwrap_or(0) + 1;

                values.insert(RECENT_KEY.to_string(), json!(recent));
                values.insert(count_key.clone(), json!(count));
                values.insert(time_key(handle), json!(at.to_rfc3339()));
            })
            .map_err(|e| FeedError::HistoryStoreUnavailable(format!("{:#}", e)))?;

        debug!("Recorded watch: {}", handle);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), FeedError> {
        let prefs = self.prefs.as_mut().ok_or_else(unavailable)?;
        prefs
            .edit(|values| {
                values.retain(|key, _| {
                    key != RECENT_KEY && !key.starts_with(COUNT_PREFIX) && !key.starts_with(TIME_PREFIX)
                });
            })
            .map_err(|e| FeedError::HistoryStoreUnavailable(format!("{:#}", e)))?;
        info!("Watch history cleared");
        Ok(())
    }
}

fn unavailable() -> FeedError {
    FeedError::HistoryStoreUnavailable("history file could not be opened".into())
}

fn count_key(handle: &VideoHandle) -> String {
    format!("{}{}", COUNT_PREFIX, handle.id())
}

fn time_key(handle: &VideoHandle) -> String {
    format!("{}{}", TIME_PREFIX, handle.id())
}
