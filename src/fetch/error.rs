use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure to list a playlist. Fatal to the pass that asked for it.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("Failed to run {program} for {reference}: {source}")]
    Spawn {
        program: String,
        reference: String,
        source: std::io::Error,
    },

    #[error("Listing {reference} timed out after {}s", .timeout.as_secs())]
    Timeout { reference: String, timeout: Duration },

    #[error("Listing {reference} failed ({status}): {output}")]
    Exit {
        reference: String,
        status: String,
        output: String,
    },

    #[error("Unparsable listing for {reference}: {source}")]
    Parse {
        reference: String,
        source: serde_json::Error,
    },
}

/// Failure to fetch a single item. The pass skips the item and continues.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to run {program} for item {item}: {source}")]
    Spawn {
        program: String,
        item: String,
        source: std::io::Error,
    },

    #[error("Fetching item {item} failed ({status}): {output}")]
    Exit {
        item: String,
        status: String,
        output: String,
    },

    #[error("No destination announced while fetching item {item}")]
    NoDestination { item: String },

    #[error("Fetched file for item {item} is unreadable at {path}: {source}")]
    Stat {
        item: String,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FetchError {
    /// External id of the item that failed.
    pub fn item(&self) -> &str {
        match self {
            FetchError::Spawn { item, .. }
            | FetchError::Exit { item, .. }
            | FetchError::NoDestination { item }
            | FetchError::Stat { item, .. } => item,
        }
    }
}
