//! Item fetcher: wraps the external media tool (`yt-dlp`) behind the
//! [`MediaTool`] trait. Listing is bounded by a timeout; fetching is not.

pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod listing;
pub mod output;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

pub use error::{FetchError, ListError};
pub use listing::RemoteItem;

/// Upper bound on a single listing call.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Output template handed to the tool; `title` and `id` are expanded by it.
const OUTPUT_TEMPLATE: &str = "%(title)s [%(id)s].%(ext)s";

/// Lines of tool output kept in error messages.
const ERROR_TAIL_LINES: usize = 20;

/// A file produced by a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// The operations the ingestor needs from the media tool.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// List the items of a playlist, in playlist order.
    async fn list(&self, reference: &str) -> Result<Vec<RemoteItem>, ListError>;

    /// Fetch one item as audio into `dest_dir`.
    async fn fetch(&self, item_id: &str, dest_dir: &Path) -> Result<FetchedFile, FetchError>;
}

/// Full playlist URL for a reference; bare ids are expanded.
pub fn listing_url(reference: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        format!("https://www.youtube.com/playlist?list={reference}")
    }
}

/// Watch URL for a single item.
pub fn item_url(item_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={item_id}")
}

/// `yt-dlp` run as a child process.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    leading_args: Vec<OsString>,
    ffmpeg_location: Option<PathBuf>,
    list_timeout: Duration,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            ffmpeg_location: None,
            list_timeout: LIST_TIMEOUT,
        }
    }

    /// Arguments placed before the tool's own, e.g. `-m yt_dlp` when the
    /// program is a Python interpreter.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ffmpeg_location(mut self, location: Option<PathBuf>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

#[async_trait]
impl MediaTool for YtDlp {
    async fn list(&self, reference: &str) -> Result<Vec<RemoteItem>, ListError> {
        let url = listing_url(reference);
        let mut cmd = self.command();
        // A listing abandoned on timeout must not leave the child running
        cmd.kill_on_drop(true);
        cmd.args([
            "--flat-playlist",
            "--dump-single-json",
            "--no-warnings",
            "--skip-download",
        ])
        .arg(&url);

        tracing::debug!(url = %url, "Listing playlist");
        let output = match tokio::time::timeout(self.list_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| ListError::Spawn {
                program: self.program_name(),
                reference: reference.to_string(),
                source: e,
            })?,
            // Dropping the future kills the child.
            Err(_) => {
                return Err(ListError::Timeout {
                    reference: reference.to_string(),
                    timeout: self.list_timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(ListError::Exit {
                reference: reference.to_string(),
                status: output.status.to_string(),
                output: output::tail(&String::from_utf8_lossy(&output.stderr), ERROR_TAIL_LINES),
            });
        }

        listing::parse_listing(&output.stdout).map_err(|e| ListError::Parse {
            reference: reference.to_string(),
            source: e,
        })
    }

    async fn fetch(&self, item_id: &str, dest_dir: &Path) -> Result<FetchedFile, FetchError> {
        let mut cmd = self.command();
        cmd.args([
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "0",
            "--embed-thumbnail",
            "--add-metadata",
        ]);
        if let Some(ffmpeg) = &self.ffmpeg_location {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }
        cmd.arg("--output")
            .arg(dest_dir.join(OUTPUT_TEMPLATE))
            .args(["--no-warnings", "--no-playlist"])
            .arg(item_url(item_id));

        tracing::debug!(id = %item_id, dir = %dest_dir.display(), "Fetching item");
        let output = cmd.output().await.map_err(|e| FetchError::Spawn {
            program: self.program_name(),
            item: item_id.to_string(),
            source: e,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push('\n');
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(FetchError::Exit {
                item: item_id.to_string(),
                status: output.status.to_string(),
                output: output::tail(&combined, ERROR_TAIL_LINES),
            });
        }

        let path = output::parse_destination(&combined).ok_or_else(|| FetchError::NoDestination {
            item: item_id.to_string(),
        })?;
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| FetchError::Stat {
                item: item_id.to_string(),
                path: path.clone(),
                source: e,
            })?
            .len();

        Ok(FetchedFile { path, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url() {
        assert_eq!(
            listing_url("PLabc"),
            "https://www.youtube.com/playlist?list=PLabc"
        );
        assert_eq!(
            listing_url("https://www.youtube.com/playlist?list=PLabc"),
            "https://www.youtube.com/playlist?list=PLabc"
        );
    }

    #[test]
    fn test_item_url() {
        assert_eq!(item_url("abc"), "https://www.youtube.com/watch?v=abc");
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        /// Stand-in for the tool: lists two items, or writes the file named by
        /// `--output` and announces it.
        const SCRIPT: &str = r#"
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "--output" ]; then out="$arg"; fi
  prev="$arg"
done
case "$MODE" in
  slow) sleep 5 ;;
  lagged) sleep 1 ;;
  fail) echo "ERROR: Video unavailable" >&2; exit 1 ;;
  silent) exit 0 ;;
esac
if [ -z "$out" ]; then
  echo '{"id":"PL1","entries":[{"id":"abc","title":"Song"},{"id":"","title":"gone"},{"id":"def","title":"Other"}]}'
  exit 0
fi
id="${prev##*=}"
path=$(printf '%s' "$out" | sed -e "s/%(title)s/Song/" -e "s/%(id)s/$id/" -e "s/%(ext)s/mp3/")
printf 'audio-bytes' > "$path"
echo "[download] Destination: ${path%.mp3}.webm"
echo "[ExtractAudio] Destination: $path"
"#;

        /// Runs the script through `sh` so no freshly written file is executed.
        fn tool(dir: &Path, mode: &str) -> YtDlp {
            let script = dir.join(format!("fake-ytdlp-{mode}.sh"));
            std::fs::write(&script, format!("MODE={mode}\n{SCRIPT}")).unwrap();
            YtDlp::new("/bin/sh").with_leading_args([script])
        }

        #[tokio::test]
        async fn test_list_parses_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let items = tool(dir.path(), "ok").list("PL1").await.unwrap();
            let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
            assert_eq!(ids, vec!["abc", "def"]);
        }

        #[tokio::test]
        async fn test_list_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let tool = tool(dir.path(), "slow").with_list_timeout(Duration::from_millis(200));
            let err = tool.list("PL1").await.unwrap_err();
            assert!(matches!(err, ListError::Timeout { .. }), "{err}");
        }

        #[tokio::test]
        async fn test_list_nonzero_exit() {
            let dir = tempfile::tempdir().unwrap();
            let err = tool(dir.path(), "fail").list("PL1").await.unwrap_err();
            match err {
                ListError::Exit { output, .. } => assert!(output.contains("Video unavailable")),
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_list_unparsable_output() {
            let dir = tempfile::tempdir().unwrap();
            let err = tool(dir.path(), "silent").list("PL1").await.unwrap_err();
            assert!(matches!(err, ListError::Parse { .. }), "{err}");
        }

        #[tokio::test]
        async fn test_fetch_reports_extracted_file() {
            let dir = tempfile::tempdir().unwrap();
            let dest = dir.path().join("Mix");
            std::fs::create_dir(&dest).unwrap();

            let fetched = tool(dir.path(), "ok").fetch("abc", &dest).await.unwrap();
            assert_eq!(fetched.path, dest.join("Song [abc].mp3"));
            assert_eq!(fetched.size, "audio-bytes".len() as u64);
        }

        #[tokio::test]
        async fn test_abandoned_fetch_runs_to_completion() {
            let dir = tempfile::tempdir().unwrap();
            let dest = dir.path().join("Mix");
            std::fs::create_dir(&dest).unwrap();

            let tool = tool(dir.path(), "lagged");
            let abandoned =
                tokio::time::timeout(Duration::from_millis(200), tool.fetch("abc", &dest)).await;
            assert!(abandoned.is_err());

            let path = dest.join("Song [abc].mp3");
            for _ in 0..100 {
                if path.exists() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            panic!("dropped fetch killed the download");
        }

        #[tokio::test]
        async fn test_fetch_failure_names_item() {
            let dir = tempfile::tempdir().unwrap();
            let err = tool(dir.path(), "fail")
                .fetch("abc", dir.path())
                .await
                .unwrap_err();
            assert_eq!(err.item(), "abc");
            assert!(matches!(err, FetchError::Exit { .. }));
        }

        #[tokio::test]
        async fn test_fetch_without_announcement() {
            let dir = tempfile::tempdir().unwrap();
            let err = tool(dir.path(), "silent")
                .fetch("abc", dir.path())
                .await
                .unwrap_err();
            assert!(matches!(err, FetchError::NoDestination { .. }));
        }

        #[tokio::test]
        async fn test_missing_program() {
            let dir = tempfile::tempdir().unwrap();
            let err = YtDlp::new(dir.path().join("no-such-tool"))
                .list("PL1")
                .await
                .unwrap_err();
            assert!(matches!(err, ListError::Spawn { .. }));
        }
    }
}
