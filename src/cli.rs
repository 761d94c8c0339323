use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::parse_duration;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "pp-downloader-rs",
    about = "Mirror remote playlists as a local audio library",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Options for `watch`, accepted without the subcommand name too
    #[command(flatten)]
    pub watch: WatchArgs,
}

impl Cli {
    /// The command to run; `watch` when none was given.
    pub fn effective_command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Watch(self.watch.clone()))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Poll every configured playlist and validate files until stopped (default)
    Watch(WatchArgs),

    /// Run a single pass over one playlist and exit
    Sync(SyncArgs),

    /// Show per-playlist item counts and validation state
    Status,

    /// Check recorded files on disk once and exit
    Validate(ValidateArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Root directory; each playlist gets a subdirectory
    #[arg(long = "music-dir", env = "MUSIC_PARENT_DIR", default_value = "/music", global = true)]
    pub music_dir: String,

    /// SQLite state database
    #[arg(long, env = "DB_PATH", default_value = "/music/downloads.db", global = true)]
    pub db_path: String,

    /// JSON file mapping playlist names to URLs or ids
    #[arg(
        long = "playlists",
        env = "JSON_PATH",
        default_value = "/config/playlists.json",
        global = true
    )]
    pub playlists_file: String,

    /// yt-dlp executable
    #[arg(long, env = "YTDLP_PATH", default_value = "yt-dlp", global = true)]
    pub ytdlp_path: String,

    /// Extra argument placed before yt-dlp's own (repeatable),
    /// e.g. `--ytdlp-path python3 --ytdlp-arg=-m --ytdlp-arg=yt_dlp`
    #[arg(long = "ytdlp-arg", allow_hyphen_values = true, global = true)]
    pub ytdlp_args: Vec<String>,

    /// ffmpeg binary or directory handed to yt-dlp
    #[arg(long = "ffmpeg-location", env = "FFMPEG_PATH", global = true)]
    pub ffmpeg_path: Option<String>,

    /// Give up on a playlist listing after this long
    #[arg(long, env = "LIST_TIMEOUT", default_value = "5m", value_parser = parse_duration, global = true)]
    pub list_timeout: Duration,

    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Polling interval for playlists without recent changes (e.g. 15m, 1h)
    #[arg(long, env = "WATCH_INTERVAL", default_value = "15m", value_parser = parse_duration)]
    pub watch_interval: Duration,

    /// Time between validation passes
    #[arg(long, env = "VALIDATE_INTERVAL", default_value = "24h", value_parser = parse_duration)]
    pub validate_interval: Duration,

    /// Re-check a recorded file once its last validation is this old
    #[arg(long, env = "VALIDATE_MAX_AGE", default_value = "7d", value_parser = parse_duration)]
    pub validate_max_age: Duration,

    /// Drop records of files still missing after a validation pass
    #[arg(long)]
    pub cleanup_missing: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Playlist name from the playlists file, or a playlist URL or id
    pub playlist: String,

    /// Directory name to use when syncing a URL or id directly
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Only check files whose last validation is at least this old
    #[arg(long, env = "VALIDATE_MAX_AGE", default_value = "7d", value_parser = parse_duration)]
    pub max_age: Duration,

    /// Check every recorded file regardless of age
    #[arg(long)]
    pub all: bool,

    /// Delete records of files that are still missing afterwards
    #[arg(long)]
    pub cleanup: bool,
}
