use clap::Parser;
use std::path::PathBuf;

// Thumbnail backend info (compile-time)
#[cfg(feature = "ffmpeg")]
const THUMB_BACKEND: &str = "playa-ffmpeg 8.0 (static)";
#[cfg(not(feature = "ffmpeg"))]
const THUMB_BACKEND: &str = "none (build with --features ffmpeg)";

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Thumbnails: ", THUMB_BACKEND, "\n",
    "Target:     ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Personal short-video feed
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Feed folder name to look for under the search roots (default from settings)
    #[arg(value_name = "FOLDER")]
    pub folder: Option<String>,

    /// Additional search root (can be specified multiple times)
    #[arg(short = 'r', long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Allow-list file to use instead of the folder's allowlist.txt
    #[arg(short = 'a', long = "allow-list", value_name = "FILE")]
    pub allow_list: Option<PathBuf>,

    /// Show every discovered video, ignoring the allow-list
    #[arg(long = "no-allow-list")]
    pub no_allow_list: bool,

    /// Order the feed by watch history
    #[arg(long = "child-mode", value_name = "0|1")]
    pub child_mode: Option<u8>,

    /// Number of scroll positions to simulate from the start of the feed
    #[arg(short = 's', long = "steps", value_name = "N", default_value = "1")]
    pub steps: usize,

    /// Delete all cached thumbnails before starting
    #[arg(long = "clear-cache")]
    pub clear_cache: bool,

    /// Delete watch history before starting
    #[arg(long = "clear-history")]
    pub clear_history: bool,

    /// Enable debug logging to file (default: reels.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}
