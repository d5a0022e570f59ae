//! Disk tier - one JPEG per thumbnail key, named by a blake3 hash of the key.
//!
//! The directory is owned exclusively by the thumbnail cache. File names are
//! an implementation detail and may change between versions. Entries are
//! never evicted automatically; only `clear()` removes them.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::RgbaImage;
use image::codecs::jpeg::JpegEncoder;
use log::{debug, warn};

use crate::entities::{FeedError, ThumbnailKey};

/// JPEG quality for stored thumbnails
pub const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    /// Open tier rooted at `dir`, creating it if needed.
    ///
    /// Creation failure is logged, not fatal: later writes fail with
    /// `CacheWriteFailed` and the memory tier keeps working.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Cannot create thumbnail directory {}: {}", dir.display(), e);
        }
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the entry for `key` lives at (whether or not it exists).
    pub fn file_for(&self, key: &ThumbnailKey) -> PathBuf {
        let hash = blake3::hash(key.fingerprint().as_bytes()).to_hex();
        self.dir.join(format!("thumb_{}.jpg", &hash.as_str()[..32]))
    }

    /// Path of the stored entry, if present.
    pub fn locate(&self, key: &ThumbnailKey) -> Option<PathBuf> {
        let path = self.file_for(key);
        path.is_file().then_some(path)
    }

    /// Decode stored entry. Unreadable files are treated as a miss.
    pub fn load(&self, key: &ThumbnailKey) -> Option<RgbaImage> {
        let path = self.locate(key)?;
        match image::open(&path) {
            Ok(img) => Some(img.to_rgba8()),
            Err(e) => {
                warn!("Error reading cached thumbnail {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Encode and store an entry. Writes a temp sibling first, then renames,
    /// so readers never observe a partial file.
    pub fn store(&self, key: &ThumbnailKey, image: &RgbaImage) -> Result<PathBuf, FeedError> {
        let path = self.file_for(key);
        let tmp = path.with_extension("jpg.tmp");
        let write_failed = |reason: String| FeedError::CacheWriteFailed {
            path: path.display().to_string(),
            reason,
        };

        let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let file = fs::File::create(&tmp).map_err(|e| write_failed(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        let encoded = {
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            encoder.encode_image(&rgb).map_err(|e| e.to_string())
        };
        let flushed = encoded.and_then(|()| writer.flush().map_err(|e| e.to_string()));
        if let Err(reason) = flushed {
            let _ = fs::remove_file(&tmp);
            return Err(write_failed(reason));
        }

        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(write_failed(e.to_string()));
        }

        debug!("Stored thumbnail {}", path.display());
        Ok(path)
    }

    /// Delete every file in the tier directory. Returns number removed.
    pub fn clear(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Thumbnail directory not readable ({}): {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
            }
        }
        debug!("Disk tier cleared: {} files", removed);
        removed
    }
}
