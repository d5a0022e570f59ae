//! Feed error taxonomy.
//!
//! All variants are locally recoverable: callers log them and degrade
//! (empty feed, placeholder thumbnail, discovery order) instead of failing.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Media roots missing or unreadable.
    #[error("video discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// Source could not be opened, seeked or decoded.
    #[error("thumbnail generation failed for {locator}: {reason}")]
    GenerationFailed { locator: String, reason: String },

    /// Durable watch-history backend unreachable.
    #[error("watch history store unavailable: {0}")]
    HistoryStoreUnavailable(String),

    /// Disk tier write failed (disk full, permissions).
    #[error("thumbnail cache write failed for {path}: {reason}")]
    CacheWriteFailed { path: String, reason: String },
}

impl FeedError {
    pub fn generation(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self::GenerationFailed {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}
