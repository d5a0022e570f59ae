//! Video identity - opaque locator string plus derived display name.
//!
//! Every cache, counter and feed slot keys off `VideoHandle::id`. Two handles
//! are the same video exactly when their locator strings are equal.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

/// Stable identity for a discovered video resource.
///
/// Cheap to clone (shared string storage); immutable once created.
#[derive(Clone)]
pub struct VideoHandle {
    id: Arc<str>,
    name: Arc<str>,
}

impl VideoHandle {
    /// Create handle from a locator string (file path, content URI, ...).
    pub fn new(locator: impl AsRef<str>) -> Self {
        let locator = locator.as_ref();
        Self {
            id: Arc::from(locator),
            name: Arc::from(display_name_of(locator)),
        }
    }

    /// Create handle for a file on disk.
    pub fn from_path(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }

    /// Identity string.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last path segment without extension.
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Locator as a filesystem path (meaningful for file-backed handles only).
    pub fn as_path(&self) -> &Path {
        Path::new(&*self.id)
    }
}

/// Last non-empty segment of a `/` or `\` separated locator, minus its extension.
fn display_name_of(locator: &str) -> &str {
    let segment = locator
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(locator);
    match segment.rfind('.') {
        Some(dot) => &segment[..dot],
        None => segment,
    }
}

impl PartialEq for VideoHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VideoHandle {}

impl Hash for VideoHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for VideoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VideoHandle({})", self.id)
    }
}

impl fmt::Display for VideoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
