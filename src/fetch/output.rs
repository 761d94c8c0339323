use std::path::PathBuf;

/// Announced by the audio extraction post-processor; names the final file.
const EXTRACT_AUDIO_PREFIX: &str = "[ExtractAudio] Destination:";
/// Announced by the downloader; names the pre-conversion file.
const DOWNLOAD_PREFIX: &str = "[download] Destination:";

/// Find the path of the produced file in the tool's combined output.
///
/// An extraction announcement always wins over a download announcement.
/// Within one kind the first announcement wins. Progress output uses
/// carriage returns, so those are treated as line breaks too.
pub fn parse_destination(output: &str) -> Option<PathBuf> {
    [EXTRACT_AUDIO_PREFIX, DOWNLOAD_PREFIX]
        .iter()
        .find_map(|prefix| find_announcement(output, prefix))
}

fn find_announcement(output: &str, prefix: &str) -> Option<PathBuf> {
    output.split(['\n', '\r']).find_map(|line| {
        let path = line.trim_start().strip_prefix(prefix)?.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    })
}

/// Last `max_lines` non-empty lines of tool output, for error messages.
pub(crate) fn tail(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
