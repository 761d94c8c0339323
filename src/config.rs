use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::cli::{CommonArgs, WatchArgs};
use crate::ingest::extract_playlist_id;
use crate::scheduler::WatchedPlaylist;

/// Paths and tool settings shared by every command.
#[derive(Debug, Clone)]
pub struct Config {
    pub media_root: PathBuf,
    pub db_path: PathBuf,
    pub playlists_file: PathBuf,
    pub ytdlp_path: PathBuf,
    pub ytdlp_args: Vec<String>,
    pub ffmpeg_path: Option<PathBuf>,
    pub list_timeout: Duration,
}

impl Config {
    pub fn from_cli(args: CommonArgs) -> anyhow::Result<Self> {
        if args.music_dir.trim().is_empty() {
            anyhow::bail!("Music directory must not be empty");
        }
        if args.db_path.trim().is_empty() {
            anyhow::bail!("Database path must not be empty");
        }
        if args.list_timeout.is_zero() {
            anyhow::bail!("List timeout must be greater than zero");
        }

        Ok(Self {
            media_root: expand_tilde(&args.music_dir),
            db_path: expand_tilde(&args.db_path),
            playlists_file: expand_tilde(&args.playlists_file),
            ytdlp_path: expand_tilde(&args.ytdlp_path),
            ytdlp_args: args.ytdlp_args,
            ffmpeg_path: args
                .ffmpeg_path
                .filter(|p| !p.trim().is_empty())
                .map(|p| expand_tilde(&p)),
            list_timeout: args.list_timeout,
        })
    }
}

/// Timing for the long-running `watch` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    pub watch_interval: Duration,
    pub validate_interval: Duration,
    pub validate_max_age: Duration,
    pub cleanup_missing: bool,
}

impl WatchConfig {
    pub fn from_args(args: &WatchArgs) -> anyhow::Result<Self> {
        if args.watch_interval.is_zero() {
            anyhow::bail!("Watch interval must be greater than zero");
        }
        if args.validate_interval.is_zero() {
            anyhow::bail!("Validation interval must be greater than zero");
        }
        Ok(Self {
            watch_interval: args.watch_interval,
            validate_interval: args.validate_interval,
            validate_max_age: args.validate_max_age,
            cleanup_missing: args.cleanup_missing,
        })
    }
}

/// On-disk shape of the playlists file: `{"playlists": {"Name": "url-or-id"}}`.
#[derive(Debug, Deserialize)]
struct PlaylistsFile {
    #[serde(default)]
    playlists: BTreeMap<String, String>,
}

/// Read the playlists file. Entries come back ordered by name.
pub fn load_playlists(path: &Path) -> anyhow::Result<Vec<WatchedPlaylist>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read playlists file {}", path.display()))?;
    parse_playlists(&raw).with_context(|| format!("Invalid playlists file {}", path.display()))
}

fn parse_playlists(raw: &str) -> anyhow::Result<Vec<WatchedPlaylist>> {
    let file: PlaylistsFile = serde_json::from_str(raw)?;
    Ok(file
        .playlists
        .into_iter()
        .map(|(name, source)| WatchedPlaylist {
            name: name.trim().to_string(),
            source: source.trim().to_string(),
        })
        .collect())
}

/// Reject an empty mapping, blank names, and sources with no playlist id.
pub fn validate_playlists(playlists: &[WatchedPlaylist]) -> anyhow::Result<()> {
    if playlists.is_empty() {
        anyhow::bail!("No playlists configured");
    }
    if playlists.iter().any(|p| p.name.is_empty()) {
        anyhow::bail!("Playlist names must not be empty");
    }
    let unresolvable: Vec<&str> = playlists
        .iter()
        .filter(|p| extract_playlist_id(&p.source).is_none())
        .map(|p| p.name.as_str())
        .collect();
    if !unresolvable.is_empty() {
        anyhow::bail!(
            "No playlist id found in the source of: {}",
            unresolvable.join(", ")
        );
    }
    Ok(())
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Parse a human-friendly duration.
///
/// Accepts plain seconds (`"90"`) or one or more number-unit pairs with
/// units `s`, `m`, `h`, `d` (`"15m"`, `"1h30m"`, `"7d"`).
pub(crate) fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let invalid = || {
        anyhow::anyhow!(
            "Cannot parse '{}' as a duration. Expected seconds (90) or units like 30s, 15m, 24h, 7d, 1h30m",
            s
        )
    };
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (digits, tail) = rest.split_at(digits_end);
        let value: u64 = digits.parse().map_err(|_| invalid())?;

        let mut chars = tail.chars();
        let unit_secs = match chars.next() {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 3600,
            Some('d') => 86_400,
            _ => return Err(invalid()),
        };
        total = value
            .checked_mul(unit_secs)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
        rest = chars.as_str();
    }
    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Music");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Music"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/music"), PathBuf::from("/music"));
        assert_eq!(expand_tilde("yt-dlp"), PathBuf::from("yt-dlp"));
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_duration_invalid() {
        for bad in ["", "m", "15x", "1h30", "-5m", "soon", "99999999999999999999d"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_parse_playlists() {
        let raw = r#"{"playlists": {
            "Road Trip": "https://www.youtube.com/playlist?list=PLroad",
            "Focus": "PLfocus"
        }}"#;
        let playlists = parse_playlists(raw).unwrap();
        assert_eq!(
            playlists,
            vec![
                WatchedPlaylist {
                    name: "Focus".into(),
                    source: "PLfocus".into()
                },
                WatchedPlaylist {
                    name: "Road Trip".into(),
                    source: "https://www.youtube.com/playlist?list=PLroad".into()
                },
            ]
        );
        validate_playlists(&playlists).unwrap();
    }

    #[test]
    fn test_validate_playlists_rejects_empty() {
        let playlists = parse_playlists("{}").unwrap();
        assert!(validate_playlists(&playlists).is_err());
    }

    #[test]
    fn test_validate_playlists_names_unresolvable_sources() {
        let playlists =
            parse_playlists(r#"{"playlists": {"Single": "https://www.youtube.com/watch?v=abc"}}"#)
                .unwrap();
        let err = validate_playlists(&playlists).unwrap_err();
        assert!(err.to_string().contains("Single"));
    }

    #[test]
    fn test_load_playlists_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlists.json");
        std::fs::write(&path, "not json").unwrap();
        let err = load_playlists(&path).unwrap_err();
        assert!(format!("{err:#}").contains("playlists.json"));

        std::fs::write(&path, r#"{"playlists": {"Mix": "PL1"}}"#).unwrap();
        assert_eq!(load_playlists(&path).unwrap().len(), 1);
    }

    fn watch_args(watch: u64, validate: u64) -> WatchArgs {
        WatchArgs {
            watch_interval: Duration::from_secs(watch),
            validate_interval: Duration::from_secs(validate),
            validate_max_age: Duration::ZERO,
            cleanup_missing: false,
        }
    }

    #[test]
    fn test_watch_config_rejects_zero_intervals() {
        assert!(WatchConfig::from_args(&watch_args(0, 60)).is_err());
        assert!(WatchConfig::from_args(&watch_args(60, 0)).is_err());
        let cfg = WatchConfig::from_args(&watch_args(900, 86_400)).unwrap();
        assert_eq!(cfg.watch_interval, Duration::from_secs(900));
        assert_eq!(cfg.validate_max_age, Duration::ZERO);
    }

    #[test]
    fn test_from_cli_expands_paths() {
        use clap::Parser;
        let cli = crate::cli::Cli::try_parse_from([
            "pp-downloader-rs",
            "--music-dir",
            "/srv/music",
            "--db-path",
            "/srv/state/pp.db",
            "--ffmpeg-location",
            "~/bin/ffmpeg",
        ])
        .unwrap();
        let cfg = Config::from_cli(cli.common).unwrap();
        assert_eq!(cfg.media_root, PathBuf::from("/srv/music"));
        assert_eq!(cfg.db_path, PathBuf::from("/srv/state/pp.db"));
        assert_eq!(cfg.ffmpeg_path, Some(expand_tilde("~/bin/ffmpeg")));
        assert!(cfg.ytdlp_args.is_empty());
        assert_eq!(cfg.list_timeout, Duration::from_secs(300));
    }
}
