//! Durable key-value file (JSON object on disk).
//!
//! Values are kept in memory and rewritten in full on every [`PrefsStore::edit`].
//! An edit applies to a copy, which is written to a temp sibling and renamed
//! over the file; only then does the copy become current. A failed write
//! leaves both the file and the in-memory state untouched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[derive(Debug, Default)]
pub struct PrefsStore {
    /// None = memory only
    path: Option<PathBuf>,
    values: Map<String, Value>,
}

impl PrefsStore {
    /// Load from `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        debug!("Prefs loaded: {} ({} keys)", path.display(), values.len());
        Ok(Self { path: Some(path), values })
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply `f` to a copy of all values, persist, then commit.
    pub fn edit<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut next = self.values.clone();
        f(&mut next);
        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
        }
        self.values = next;
        Ok(())
    }
}

fn write_atomic(path: &Path, values: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(values).context("Failed to serialize prefs")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }
    trace!("Prefs written: {}", path.display());
    Ok(())
}
