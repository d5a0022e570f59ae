use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};

use reels::cli::Args;
use reels::config::{self, AppSettings, PathConfig, SETTINGS_FILE};
use reels::core::generator::default_generator;
use reels::core::workers::default_thread_count;
use reels::core::{
    AllowList, CacheManager, FeedOrchestrator, FeedSnapshot, ThumbnailCache, WatchHistoryStore, Workers,
};
use reels::discovery::FsVideoSource;

/// Watch history file under the data directory
const HISTORY_FILE: &str = "watch_history.json";

/// Upper bound for discovery and warm-up in the CLI run
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| config::data_file("reels.log", path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Settings file plus command-line overrides.
fn effective_settings(args: &Args, path_config: &PathConfig) -> AppSettings {
    let settings_path = config::config_file(SETTINGS_FILE, path_config);
    let mut settings = AppSettings::load(&settings_path);
    // First run: leave an editable copy of the defaults
    if !settings_path.exists() {
        if let Err(e) = settings.save(&settings_path) {
            warn!("{:#}", e);
        }
    }
    if let Some(folder) = &args.folder {
        settings.folder_name = folder.clone();
    }
    settings.roots.extend(args.roots.iter().cloned());
    if args.no_allow_list {
        settings.allow_list_enabled = false;
    }
    if let Some(child_mode) = args.child_mode {
        settings.child_mode = child_mode != 0;
    }
    settings
}

fn print_feed(snapshot: &FeedSnapshot, cache: &ThumbnailCache) {
    if let Some(notice) = &snapshot.notice {
        println!("{}", notice);
    }
    for (index, handle) in snapshot.feed.iter().enumerate() {
        let marker = if snapshot.current_index == Some(index) { '>' } else { ' ' };
        let thumb = cache
            .cache_locator(handle)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {:>3}  {:<40} watched {:>3}x  thumb {}",
            marker,
            index,
            handle.display_name(),
            snapshot.watch_count(handle),
            thumb
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {:#}", e);
    }

    init_logging(&args, &path_config)?;
    info!("Reels starting...");
    debug!("Command-line args: {:?}", args);

    let settings = effective_settings(&args, &path_config);
    debug!("Settings: {:?}", settings);

    // Thumbnail cache
    let manager = Arc::new(CacheManager::new(settings.memory_fraction));
    let cache = Arc::new(
        ThumbnailCache::new(
            config::thumbnail_dir(&path_config),
            manager,
            default_generator(settings.thumbnail_max_width),
        )
        .with_wait(settings.in_flight_wait())
        .with_default_timestamp(settings.thumbnail_timestamp_ms),
    );
    if args.clear_cache {
        cache.clear();
    }

    // Watch history
    let history = Arc::new(WatchHistoryStore::open(config::data_file(HISTORY_FILE, &path_config)));
    if args.clear_history {
        if let Err(e) = history.clear_all() {
            warn!("{}", e);
        }
    }

    let num_workers = match settings.workers_override {
        0 => default_thread_count(),
        n => n as usize,
    };
    let workers = Arc::new(Workers::new(num_workers));
    let source = Arc::new(FsVideoSource::with_default_roots(settings.roots.iter().cloned()));
    info!("Search roots: {:?}", source.roots());

    let mut orchestrator = FeedOrchestrator::new(
        settings.feed_config(),
        source,
        Arc::clone(&cache),
        history,
        workers,
    );
    if let Some(path) = &args.allow_list {
        orchestrator.set_allow_list(Some(AllowList::load(path)?));
    }

    orchestrator.request_discovery();
    if !orchestrator.wait_ready(SETTLE_TIMEOUT) {
        anyhow::bail!("Discovery did not finish within {:?}", SETTLE_TIMEOUT);
    }

    let snapshot = orchestrator.snapshot();
    if let Some(start) = snapshot.virtual_position.filter(|_| !snapshot.feed.is_empty()) {
        for step in 0..args.steps {
            let position = start + step as i64;
            if let Some(update) = orchestrator.on_position_changed(position) {
                let prefetch: Vec<&str> = update.prefetch.iter().map(|h| h.display_name()).collect();
                println!(
                    "position {} -> [{}] {} (prefetch: {})",
                    update.virtual_position,
                    update.actual_index,
                    update.handle.display_name(),
                    prefetch.join(", ")
                );
            }
        }
    }

    for event in orchestrator.wait_idle(SETTLE_TIMEOUT) {
        debug!("Event: {:?}", event);
    }

    println!();
    print_feed(&orchestrator.snapshot(), &cache);

    let stats = cache.stats();
    let (used, limit) = cache.mem();
    println!(
        "\nthumbnails: {} hits, {} misses ({:.0}% hit rate), {} generated, memory {} KB / {} MB",
        stats.hits(),
        stats.misses(),
        stats.hit_rate() * 100.0,
        cache.generation_count(),
        used / 1024,
        limit / 1024 / 1024
    );
    Ok(())
}
