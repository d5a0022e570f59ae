//! REELS - personal short-video feed library
//!
//! Re-exports all modules for use by the binary target.

// Feed engine (cache, history, feed order, orchestrator)
pub mod core;

// App modules
pub mod cli;
pub mod config;
pub mod discovery;
pub mod entities;

// Re-export commonly used types from core
pub use crate::core::cache_man::CacheManager;
pub use crate::core::orchestrator::{FeedEvent, FeedOrchestrator, FeedSnapshot, FeedState};
pub use crate::core::thumb_cache::ThumbnailCache;
pub use discovery::{FsVideoSource, VideoSource};

// Re-export entities
pub use entities::{FeedError, Thumbnail, ThumbnailKey, VideoHandle};
