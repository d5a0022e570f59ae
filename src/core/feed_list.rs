//! Feed construction: discovery → allow-list filter → history reorder.
//!
//! Pure data transformation; the result is rebuilt from scratch whenever any
//! input changes.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, trace};

use crate::entities::VideoHandle;

/// File name of the allow-list inside the feed folder
pub const ALLOW_LIST_FILE: &str = "allowlist.txt";

/// Lowercase name fragments a video must contain to be shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    fragments: BTreeSet<String>,
}

impl AllowList {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fragments = fragments
            .into_iter()
            .map(|f| f.as_ref().trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        Self { fragments }
    }

    /// One fragment per line; blank lines and `#` comments ignored.
    pub fn parse(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#')),
        )
    }

    /// Load from file. A missing file is an empty list.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let list = Self::parse(&text);
                debug!("Allow-list loaded: {} ({} fragments)", path.display(), list.len());
                Ok(list)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read allow-list {}", path.display())),
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        self.fragments.iter().map(String::as_str)
    }

    /// Case-insensitive substring match against any fragment.
    pub fn matches(&self, display_name: &str) -> bool {
        let name = display_name.to_lowercase();
        self.fragments.iter().any(|f| name.contains(f.as_str()))
    }
}

/// Canonical ordered, duplicate-free feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedList {
    items: Vec<VideoHandle>,
}

impl FeedList {
    /// Build the feed.
    ///
    /// Filtering applies only when enabled and the list is non-empty (an empty
    /// list shows everything). Watched items come first in `history` order,
    /// then the rest in discovery order. History entries not in the filtered
    /// set are ignored.
    pub fn build(
        discovered: &[VideoHandle],
        allow_list_enabled: bool,
        allow_list: &AllowList,
        history: &[VideoHandle],
    ) -> Self {
        let mut seen = HashSet::with_capacity(discovered.len());
        let unique = discovered.iter().filter(|h| seen.insert(*h));

        let filtered: Vec<&VideoHandle> = if allow_list_enabled && !allow_list.is_empty() {
            unique.filter(|h| allow_list.matches(h.display_name())).collect()
        } else {
            unique.collect()
        };

        let present: HashSet<&VideoHandle> = filtered.iter().copied().collect();
        let mut placed: HashSet<&VideoHandle> = HashSet::with_capacity(filtered.len());
        let mut items = Vec::with_capacity(filtered.len());

        for handle in history {
            if present.contains(handle) && placed.insert(handle) {
                items.push(handle.clone());
            }
        }
        for handle in filtered {
            if !placed.contains(handle) {
                items.push(handle.clone());
            }
        }

        trace!(
            "FeedList built: {} discovered, {} shown, {} from history",
            discovered.len(),
            items.len(),
            placed.len()
        );
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&VideoHandle> {
        self.items.get(index)
    }

    pub fn items(&self) -> &[VideoHandle] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VideoHandle> {
        self.items.iter()
    }

    pub fn position(&self, handle: &VideoHandle) -> Option<usize> {
        self.items.iter().position(|h| h == handle)
    }
}

impl<'a> IntoIterator for &'a FeedList {
    type Item = &'a VideoHandle;
    type IntoIter = std::slice::Iter<'a, VideoHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
