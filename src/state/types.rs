//! Types for the state store.

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};

/// File validation status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationStatus {
    /// Not yet confirmed on disk.
    Pending,
    /// File was present at the last validation.
    Valid,
    /// File was absent at the last validation.
    Missing,
    /// Stat failed for a reason other than absence.
    Error,
}

impl ValidationStatus {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Missing => "missing",
            Self::Error => "error",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "valid" => Some(Self::Valid),
            "missing" => Some(Self::Missing),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Classify the outcome of a `metadata()` call on a recorded file path.
    pub fn from_stat<T>(result: &std::io::Result<T>) -> Self {
        match result {
            Ok(_) => Self::Valid,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::Missing,
            Err(_) => Self::Error,
        }
    }
}

/// Descriptive metadata for an item, as reported by the listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMetadata {
    pub title: String,
    pub description: String,
    pub channel: String,
    pub channel_id: String,
    pub thumbnail_url: Option<String>,
    /// Raw listing entry, kept verbatim.
    pub metadata_json: Option<String>,
    pub view_count: i64,
    /// Whole seconds.
    pub duration: i64,
    pub upload_date: Option<DateTime<Utc>>,
    pub live_start_time: Option<DateTime<Utc>>,
    pub live_end_time: Option<DateTime<Utc>>,
    pub is_live: bool,
}

/// A playlist row.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    /// Row id, referenced by items.
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub item_count: u64,
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An item row.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub external_id: String,
    /// External id of the owning playlist.
    pub playlist_external_id: String,
    pub playlist_title: String,
    pub metadata: ItemMetadata,
    pub file_path: Option<PathBuf>,
    pub file_size: u64,
    pub last_validated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub validation_status: ValidationStatus,
}

/// Outcome counts of one validation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub checked: u64,
    pub valid: u64,
    pub missing: u64,
    pub error: u64,
}

impl SweepStats {
    pub fn record(&mut self, status: ValidationStatus) {
        self.checked += 1;
        match status {
            ValidationStatus::Valid => self.valid += 1,
            ValidationStatus::Missing => self.missing += 1,
            ValidationStatus::Error => self.error += 1,
            ValidationStatus::Pending => {}
        }
    }
}

/// Per-playlist counts for the `status` command.
#[derive(Debug, Clone)]
pub struct PlaylistSummary {
    pub playlist: Playlist,
    pub valid: u64,
    pub pending: u64,
    pub missing: u64,
    pub error: u64,
}

pub(crate) fn to_timestamp(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn from_opt_timestamp(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
}
