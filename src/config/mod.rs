//! Application configuration - directory resolution and persisted settings.

pub mod paths;
pub mod settings;

pub use paths::{CONFIG_DIR_ENV, PathConfig, config_file, data_file, ensure_dirs, thumbnail_dir};
pub use settings::{AppSettings, SETTINGS_FILE};
