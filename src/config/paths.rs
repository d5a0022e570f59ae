//! Config, data and cache directory resolution.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directory name under platform dirs
const APP_DIR: &str = "reels";

/// Environment override for all directories
pub const CONFIG_DIR_ENV: &str = "REELS_CONFIG_DIR";

/// Files whose presence in the current directory makes it the app directory
const LOCAL_MARKERS: [&str; 2] = ["reels.json", "reels.log"];

/// Overrides for default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom directory (from CLI or ENV); holds config, data and cache
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI arg → `REELS_CONFIG_DIR` → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from));
        Self { config_dir }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: Some(dir.into()),
        }
    }
}

/// Path to a configuration file.
///
/// Priority:
/// 1. `--config-dir`
/// 2. `REELS_CONFIG_DIR`
/// 3. Current directory IF it already holds reels.json or reels.log
/// 4. Platform config directory (Linux: ~/.config/reels)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config_dir(config).join(name)
}

/// Path to a data file (watch history, logs). Same priority as [`config_file`],
/// platform default ~/.local/share/reels.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    data_dir(config).join(name)
}

/// Thumbnail disk tier directory (platform default ~/.cache/reels/thumbnails).
pub fn thumbnail_dir(config: &PathConfig) -> PathBuf {
    let base = resolve(config, dirs_next::cache_dir);
    base.join("thumbnails")
}

/// Create config and data directories if missing.
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = config_dir(config);
    let data_dir = data_dir(config);

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    if data_dir != config_dir {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

fn has_local_files(dir: &Path) -> bool {
    LOCAL_MARKERS.iter().any(|f| dir.join(f).exists())
}

fn config_dir(config: &PathConfig) -> PathBuf {
    resolve(config, dirs_next::config_dir)
}

fn data_dir(config: &PathConfig) -> PathBuf {
    resolve(config, dirs_next::data_dir)
}

fn resolve(config: &PathConfig, platform: fn() -> Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    if let Ok(current_dir) = std::env::current_dir() {
        if has_local_files(&current_dir) {
            return current_dir;
        }
    }

    platform()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}
