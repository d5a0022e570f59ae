//! Thumbnail key and decoded thumbnail image.

use std::sync::Arc;

use image::RgbaImage;

use super::video::VideoHandle;

/// Default frame offset into the clip (1 second).
pub const DEFAULT_TIMESTAMP_MS: u64 = 1000;

/// One cacheable thumbnail: (video, frame timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailKey {
    pub handle: VideoHandle,
    pub timestamp_ms: u64,
}

impl ThumbnailKey {
    pub fn new(handle: VideoHandle, timestamp_ms: u64) -> Self {
        Self { handle, timestamp_ms }
    }

    /// Byte string the disk tier hashes. Covers the full key.
    pub fn fingerprint(&self) -> String {
        format!("{}_{}", self.handle.id(), self.timestamp_ms)
    }
}

/// Decoded RGBA thumbnail.
///
/// Clones share pixel storage, so two clones are the "same image" in the
/// sense of [`Thumbnail::same_image`].
#[derive(Debug, Clone)]
pub struct Thumbnail {
    image: Arc<RgbaImage>,
}

impl Thumbnail {
    pub fn new(image: RgbaImage) -> Self {
        Self { image: Arc::new(image) }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Decoded size in bytes (memory tier weight).
    pub fn mem(&self) -> usize {
        self.image.as_raw().len()
    }

    /// True if both refer to the same decoded buffer.
    pub fn same_image(&self, other: &Thumbnail) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_covers_timestamp() {
        let h = VideoHandle::new("/v/a.mp4");
        let a = ThumbnailKey::new(h.clone(), 1000);
        let b = ThumbnailKey::new(h, 2000);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a, b);
    }

    #[test]
    fn test_mem_is_rgba_bytes() {
        let t = Thumbnail::new(RgbaImage::new(8, 4));
        assert_eq!(t.mem(), 8 * 4 * 4);
        assert!(t.same_image(&t.clone()));
        assert!(!t.same_image(&Thumbnail::new(RgbaImage::new(8, 4))));
    }
}
