//! Feed engine - thumbnail cache, watch history, feed order, orchestration
//!
//! Independent of any presentation layer.

pub mod cache_man;
pub mod disk_tier;
pub mod feed_list;
pub mod generator;
pub mod history;
pub mod infinite;
pub mod memory_tier;
pub mod orchestrator;
pub mod prefs;
pub mod thumb_cache;
pub mod workers;

// Re-exports for convenience
pub use cache_man::CacheManager;
pub use feed_list::{ALLOW_LIST_FILE, AllowList, FeedList};
pub use generator::{ThumbnailGenerator, UnavailableGenerator};
pub use history::{RECENT_LIMIT, WatchHistoryStore};
pub use infinite::InfiniteIndexMapper;
pub use memory_tier::CacheStats;
pub use orchestrator::{FeedConfig, FeedEvent, FeedOrchestrator, FeedSnapshot, FeedState, PositionUpdate};
pub use thumb_cache::{InFlightWait, ThumbnailCache};
pub use workers::Workers;
