use std::path::PathBuf;

use thiserror::Error;

use crate::fetch::ListError;
use crate::state::StateError;

/// Errors that abort a whole playlist pass.
///
/// Item-level failures never surface here; the pass logs them and moves on.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No playlist id in {0:?}")]
    InvalidReference(String),

    #[error(transparent)]
    List(#[from] ListError),

    #[error("State error for playlist {playlist}: {source}")]
    Store {
        playlist: String,
        source: StateError,
    },

    #[error("Cannot create playlist directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },
}
