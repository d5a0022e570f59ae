//! Persisted application settings (`reels.json`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::core::cache_man::DEFAULT_MEM_FRACTION;
use crate::core::infinite::{DEFAULT_LOOKAHEAD, DEFAULT_LOOKBEHIND};
use crate::core::orchestrator::FeedConfig;
use crate::core::thumb_cache::InFlightWait;
use crate::entities::DEFAULT_TIMESTAMP_MS;

/// Settings file name
pub const SETTINGS_FILE: &str = "reels.json";

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Feed
    pub folder_name: String,
    pub child_mode: bool,
    pub allow_list_enabled: bool,
    pub lookahead: usize,
    pub lookbehind: usize,
    pub precache_all: bool,
    /// Extra discovery roots, searched after the platform defaults
    pub roots: Vec<PathBuf>,

    // Thumbnails
    pub thumbnail_timestamp_ms: u64,
    pub thumbnail_max_width: u32,
    pub memory_fraction: f64, // share of available memory for the memory tier
    pub wait_poll_ms: u64,
    pub wait_ceiling_ms: u64,

    // Workers
    pub workers_override: u32, // 0 = auto
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            folder_name: "ShortsVideos".to_string(),
            child_mode: true,
            allow_list_enabled: true,
            lookahead: DEFAULT_LOOKAHEAD,
            lookbehind: DEFAULT_LOOKBEHIND,
            precache_all: false,
            roots: Vec::new(),
            thumbnail_timestamp_ms: DEFAULT_TIMESTAMP_MS,
            thumbnail_max_width: 720,
            memory_fraction: DEFAULT_MEM_FRACTION,
            wait_poll_ms: 100,
            wait_ceiling_ms: 3000,
            workers_override: 0,
        }
    }
}

impl AppSettings {
    /// Load settings; a missing or corrupt file gives defaults.
    pub fn load(path: &Path) -> Self {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                debug!("No settings at {} ({}), using defaults", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&json) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring corrupt settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Settings saved: {}", path.display());
        Ok(())
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            folder_name: self.folder_name.clone(),
            child_mode: self.child_mode,
            allow_list_enabled: self.allow_list_enabled,
            lookahead: self.lookahead,
            lookbehind: self.lookbehind,
            precache_all: self.precache_all,
        }
    }

    pub fn in_flight_wait(&self) -> InFlightWait {
        InFlightWait {
            poll: Duration::from_millis(self.wait_poll_ms.max(1)),
            ceiling: Duration::from_millis(self.wait_ceiling_ms),
        }
    }
}
