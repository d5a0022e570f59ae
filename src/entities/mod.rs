//! Plain data types shared by the engine: video identity, thumbnails, errors.

pub mod error;
pub mod thumbnail;
pub mod video;

pub use error::FeedError;
pub use thumbnail::{DEFAULT_TIMESTAMP_MS, Thumbnail, ThumbnailKey};
pub use video::VideoHandle;
