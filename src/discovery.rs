//! Video discovery - finds the feed folder's videos under the search roots.
//!
//! A video belongs to the feed when its parent path (lowercased, `/`
//! separated) contains `/<folder>` or `<folder>/`, or ends with `<folder>`.
//! So `Movies/ShortsVideos/a.mp4` and `Download/shortsvideos/kids/b.mkv`
//! both match folder `ShortsVideos`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::feed_list::{ALLOW_LIST_FILE, AllowList};
use crate::entities::{FeedError, VideoHandle};

/// Supported video file extensions (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "mov", "m4v", "avi", "3gp"];

/// Directory depth searched below each root
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Source of the videos shown in the feed.
pub trait VideoSource: Send + Sync {
    /// Videos in folders matching `folder`, newest first.
    fn discover(&self, folder: &str) -> Result<Vec<VideoHandle>, FeedError>;

    /// Allow-list that ships with the folder (empty if none).
    fn allow_list(&self, _folder: &str) -> AllowList {
        AllowList::default()
    }
}

/// Local filesystem discovery.
#[derive(Debug, Clone)]
pub struct FsVideoSource {
    roots: Vec<PathBuf>,
    max_depth: usize,
}

impl FsVideoSource {
    /// Search exactly `roots` (duplicates removed).
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut seen = HashSet::new();
        let roots = roots.into_iter().filter(|r| seen.insert(r.clone())).collect();
        Self {
            roots,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Platform video, download, document and home directories, then `extra`.
    pub fn with_default_roots(extra: impl IntoIterator<Item = PathBuf>) -> Self {
        let platform = [
            dirs_next::video_dir(),
            dirs_next::download_dir(),
            dirs_next::document_dir(),
            dirs_next::home_dir(),
        ];
        Self::new(platform.into_iter().flatten().chain(extra))
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// First `allowlist.txt` inside a directory named `folder` (case-insensitive).
    pub fn find_allow_list(&self, folder: &str) -> Option<PathBuf> {
        let target = folder.to_lowercase();
        self.readable_roots()
            .into_iter()
            .flat_map(|root| self.walk(root))
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| entry.file_name().to_string_lossy().to_lowercase() == target)
            .map(|entry| entry.path().join(ALLOW_LIST_FILE))
            .find(|candidate| candidate.is_file())
    }

    fn readable_roots(&self) -> Vec<&Path> {
        self.roots
            .iter()
            .filter(|root| match fs::read_dir(root) {
                Ok(_) => true,
                Err(e) => {
                    trace!("Skipping root {}: {}", root.display(), e);
                    false
                }
            })
            .map(PathBuf::as_path)
            .collect()
    }

    fn walk<'a>(&self, root: &'a Path) -> impl Iterator<Item = DirEntry> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    trace!("Error walking directory: {}", e);
                    None
                }
            })
    }
}

impl VideoSource for FsVideoSource {
    fn discover(&self, folder: &str) -> Result<Vec<VideoHandle>, FeedError> {
        let roots = self.readable_roots();
        if roots.is_empty() {
            return Err(FeedError::DiscoveryUnavailable(format!(
                "none of {} search roots is readable",
                self.roots.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for root in roots {
            debug!("Scanning {} for \"{}\"", root.display(), folder);
            for entry in self.walk(root) {
                let path = entry.path();
                if !entry.file_type().is_file() || !is_video(path) {
                    continue;
                }
                let in_folder = path.parent().is_some_and(|p| folder_matches(p, folder));
                if !in_folder || !seen.insert(path.to_path_buf()) {
                    continue;
                }
                found.push((added_time(&entry), path.to_path_buf()));
            }
        }

        // Newest first; path breaks ties so the order is stable
        found.sort_by(|(ta, pa), (tb, pb)| tb.cmp(ta).then_with(|| pa.cmp(pb)));
        info!("Discovered {} videos in \"{}\"", found.len(), folder);
        Ok(found.into_iter().map(|(_, p)| VideoHandle::from_path(&p)).collect())
    }

    fn allow_list(&self, folder: &str) -> AllowList {
        let Some(path) = self.find_allow_list(folder) else {
            return AllowList::default();
        };
        AllowList::load(&path).unwrap_or_else(|e| {
            warn!("{:#}", e);
            AllowList::default()
        })
    }
}

/// Case-insensitive folder match at a path-segment boundary.
pub fn folder_matches(dir: &Path, folder: &str) -> bool {
    let target = folder.trim_matches(['/', '\\']).to_lowercase();
    if target.is_empty() {
        return false;
    }
    let path = dir.to_string_lossy().replace('\\', "/").to_lowercase();
    path.contains(&format!("/{}", target)) || path.contains(&format!("{}/", target)) || path.ends_with(&target)
}

pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Creation time, falling back to modification time.
fn added_time(entry: &DirEntry) -> SystemTime {
    entry
        .metadata()
        .ok()
        .and_then(|m| m.created().or_else(|_| m.modified()).ok())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}
