//! pp-downloader-rs: keeps a local audio copy of remote playlists.
//!
//! Each configured playlist is polled on an adaptive cadence: every few
//! minutes while it is changing, less often once it goes quiet. New items
//! are fetched as MP3 through `yt-dlp` and recorded in SQLite; a separate
//! validator periodically confirms the recorded files still exist.

#![warn(clippy::all)]

mod cli;
mod config;
mod fetch;
mod ingest;
mod scheduler;
mod shutdown;
mod state;
mod types;
mod validator;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::{Config, WatchConfig};
use fetch::YtDlp;
use ingest::{extract_playlist_id, Ingestor};
use scheduler::{CadencePolicy, Scheduler, WatchedPlaylist};
use state::{SqliteStateDb, StateDb};
use validator::Validator;

/// Open the state database, creating its parent directory first.
async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStateDb>> {
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    let db = SqliteStateDb::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open state database {}", config.db_path.display()))?;
    Ok(Arc::new(db))
}

async fn ensure_media_root(config: &Config) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.media_root)
        .await
        .with_context(|| format!("Failed to create music directory {}", config.media_root.display()))
}

fn media_tool(config: &Config) -> Arc<YtDlp> {
    Arc::new(
        YtDlp::new(&config.ytdlp_path)
            .with_leading_args(&config.ytdlp_args)
            .with_ffmpeg_location(config.ffmpeg_path.clone())
            .with_list_timeout(config.list_timeout),
    )
}

/// Run the scheduler and validator until a shutdown signal arrives.
async fn run_watch(config: Config, args: cli::WatchArgs) -> anyhow::Result<()> {
    let watch = WatchConfig::from_args(&args)?;
    let playlists = config::load_playlists(&config.playlists_file)?;
    config::validate_playlists(&playlists)?;

    ensure_media_root(&config).await?;
    let store = open_store(&config).await?;
    tracing::info!(
        db = %config.db_path.display(),
        music_dir = %config.media_root.display(),
        watch_interval_secs = watch.watch_interval.as_secs(),
        "Starting pp-downloader-rs"
    );
    for p in &playlists {
        tracing::info!(name = %p.name, source = %p.source, "Watching playlist");
    }

    let ingestor = Arc::new(Ingestor::new(
        store.clone(),
        media_tool(&config),
        config.media_root.clone(),
    ));
    let scheduler = Scheduler::new(
        ingestor,
        CadencePolicy::with_idle(watch.watch_interval),
        playlists,
    );
    let validator = Validator::new(store, watch.validate_interval, watch.validate_max_age)
        .with_cleanup(watch.cleanup_missing);

    let token = shutdown::install_signal_handler().context("Failed to install signal handlers")?;
    let scheduler_task = tokio::spawn(scheduler.run(token.clone()));
    let validator_task = tokio::spawn(validator.run(token.clone()));

    let (scheduler_result, validator_result) = tokio::join!(scheduler_task, validator_task);
    scheduler_result.context("Scheduler task panicked")?;
    validator_result.context("Validator task panicked")?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Resolve the `sync` target: a configured name first, then a URL or id.
fn resolve_sync_target(
    args: &cli::SyncArgs,
    configured: &[WatchedPlaylist],
) -> anyhow::Result<WatchedPlaylist> {
    if let Some(p) = configured.iter().find(|p| p.name == args.playlist) {
        return Ok(p.clone());
    }
    let id = extract_playlist_id(&args.playlist).with_context(|| {
        format!(
            "'{}' is neither a configured playlist nor a playlist URL or id",
            args.playlist
        )
    })?;
    Ok(WatchedPlaylist {
        name: args.name.clone().unwrap_or(id),
        source: args.playlist.clone(),
    })
}

/// Run one pass over one playlist.
async fn run_sync(config: Config, args: cli::SyncArgs) -> anyhow::Result<()> {
    let configured = if config.playlists_file.exists() {
        config::load_playlists(&config.playlists_file)?
    } else {
        Vec::new()
    };
    let target = resolve_sync_target(&args, &configured)?;

    ensure_media_root(&config).await?;
    let store = open_store(&config).await?;
    let ingestor = Ingestor::new(store.clone(), media_tool(&config), config.media_root.clone());
    let token = shutdown::install_signal_handler().context("Failed to install signal handlers")?;

    let mut new_items = Vec::new();
    let pass = ingestor.process_playlist(&target.source, &target.name, |id, downloaded| {
        if downloaded {
            new_items.push(id.to_string());
        }
    });
    let report = tokio::select! {
        result = pass => result?,
        () = token.cancelled() => {
            tracing::warn!(name = %target.name, "Sync interrupted");
            return Ok(());
        }
    };

    for id in &new_items {
        match store.get_item(id).await? {
            Some(item) => match &item.file_path {
                Some(path) => println!("  + {} -> {}", item.metadata.title, path.display()),
                None => println!("  + {} (no file recorded)", item.metadata.title),
            },
            None => println!("  + {id}"),
        }
    }

    println!(
        "{}: {} listed, {} new, {} already present, {} failed",
        target.name, report.seen, report.downloaded, report.skipped, report.failed
    );
    if let Some(id) = extract_playlist_id(&target.source) {
        if let Some(playlist) = store.get_playlist(&id).await? {
            println!("{} item(s) recorded for {}", playlist.item_count, playlist.title);
        }
    }
    if report.failed > 0 {
        anyhow::bail!("{} item(s) failed; see log for details", report.failed);
    }
    Ok(())
}

/// Print per-playlist counts.
async fn run_status(config: Config) -> anyhow::Result<()> {
    if !config.db_path.exists() {
        println!("No state database found at {}", config.db_path.display());
        println!("Run a sync first to create the database.");
        return Ok(());
    }

    let store = SqliteStateDb::open(&config.db_path).await?;
    let summary = store.summary().await?;

    println!("State Database: {}", store.path().display());
    if summary.is_empty() {
        println!();
        println!("No playlists recorded yet.");
        return Ok(());
    }

    for s in &summary {
        println!();
        println!("{} ({})", s.playlist.title, s.playlist.external_id);
        println!("  Items:   {}", s.playlist.item_count);
        println!("  Valid:   {}", s.valid);
        println!("  Pending: {}", s.pending);
        println!("  Missing: {}", s.missing);
        println!("  Error:   {}", s.error);
        match &s.playlist.last_checked {
            Some(checked) => println!(
                "  Last checked: {}",
                checked.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("  Last checked: never"),
        }
    }
    Ok(())
}

/// Validate recorded files once, optionally dropping confirmed-missing rows.
async fn run_validate(config: Config, args: cli::ValidateArgs) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let max_age = if args.all { Duration::ZERO } else { args.max_age };
    let validator = Validator::new(store, validator::VALIDATE_INTERVAL, max_age);

    match validator.run_validation().await? {
        Some(stats) => println!(
            "Checked {} files: {} valid, {} missing, {} error",
            stats.checked, stats.valid, stats.missing, stats.error
        ),
        None => println!("No files need validation"),
    }

    if args.cleanup {
        let removed = validator.cleanup_missing_files().await?;
        println!("Removed {removed} record(s) of missing files");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let filter = match cli.common.log_level {
        types::LogLevel::Debug => "debug",
        types::LogLevel::Info => "info",
        types::LogLevel::Warn => "warn",
        types::LogLevel::Error => "error",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let command = cli.effective_command();
    let config = Config::from_cli(cli.common)?;
    tracing::debug!(?config, "Loaded configuration");

    match command {
        Command::Watch(args) => run_watch(config, args).await,
        Command::Sync(args) => run_sync(config, args).await,
        Command::Status => run_status(config).await,
        Command::Validate(args) => run_validate(config, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_args(playlist: &str, name: Option<&str>) -> cli::SyncArgs {
        cli::SyncArgs {
            playlist: playlist.into(),
            name: name.map(Into::into),
        }
    }

    fn configured() -> Vec<WatchedPlaylist> {
        vec![WatchedPlaylist {
            name: "Road Trip".into(),
            source: "https://www.youtube.com/playlist?list=PLroad".into(),
        }]
    }

    #[test]
    fn test_sync_target_by_configured_name() {
        let target = resolve_sync_target(&sync_args("Road Trip", None), &configured()).unwrap();
        assert_eq!(target, configured()[0]);
    }

    #[test]
    fn test_sync_target_by_id_defaults_name() {
        let target = resolve_sync_target(&sync_args("PLother", None), &configured()).unwrap();
        assert_eq!(target.name, "PLother");
        assert_eq!(target.source, "PLother");

        let named =
            resolve_sync_target(&sync_args("PLother", Some("Other Mix")), &configured()).unwrap();
        assert_eq!(named.name, "Other Mix");
    }

    #[test]
    fn test_sync_target_unknown() {
        assert!(resolve_sync_target(&sync_args("Not A Playlist", None), &configured()).is_err());
    }

    #[tokio::test]
    async fn test_open_store_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            media_root: dir.path().join("music"),
            db_path: dir.path().join("state").join("downloads.db"),
            playlists_file: dir.path().join("playlists.json"),
            ytdlp_path: "yt-dlp".into(),
            ytdlp_args: Vec::new(),
            ffmpeg_path: None,
            list_timeout: fetch::LIST_TIMEOUT,
        };
        let store = open_store(&config).await.unwrap();
        assert!(config.db_path.exists());
        assert!(store.summary().await.unwrap().is_empty());

        ensure_media_root(&config).await.unwrap();
        assert!(config.media_root.is_dir());
    }
}
