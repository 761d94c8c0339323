//! Parsing of the tool's flat playlist dump.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;

use crate::state::ItemMetadata;

/// One entry of a remote playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub id: String,
    pub metadata: ItemMetadata,
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    entries: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Entry {
    id: String,
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    channel_id: Option<String>,
    uploader: Option<String>,
    view_count: Option<i64>,
    thumbnail: Option<String>,
    thumbnails: Vec<Thumbnail>,
    upload_date: Option<String>,
    live_status: Option<String>,
    is_live: Option<bool>,
    release_timestamp: Option<i64>,
    live_start_time: Option<i64>,
    live_end_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnail {
    url: String,
}

/// Parse the single JSON document printed by a flat listing.
///
/// Entries without an id, or that are not objects (unavailable videos show
/// up as `null`), are dropped. Order is preserved.
pub fn parse_listing(raw: &[u8]) -> Result<Vec<RemoteItem>, serde_json::Error> {
    let listing: Listing = serde_json::from_slice(raw)?;

    let mut items = Vec::with_capacity(listing.entries.len());
    for value in listing.entries {
        let entry = match Entry::deserialize(&value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed listing entry");
                continue;
            }
        };
        if entry.id.is_empty() {
            continue;
        }
        items.push(entry.into_remote_item(value.to_string()));
    }
    Ok(items)
}

impl Entry {
    fn into_remote_item(self, raw: String) -> RemoteItem {
        let was_live = matches!(
            self.live_status.as_deref(),
            Some("is_live" | "was_live" | "post_live")
        );
        let live_start_time = self
            .live_start_time
            .or(if was_live { self.release_timestamp } else { None })
            .and_then(unix_seconds);
        let thumbnail_url = self
            .thumbnail
            .filter(|t| !t.is_empty())
            .or_else(|| self.thumbnails.into_iter().map(|t| t.url).rfind(|u| !u.is_empty()));

        RemoteItem {
            metadata: ItemMetadata {
                title: self.title.unwrap_or_else(|| self.id.clone()),
                description: self.description.unwrap_or_default(),
                channel: self.channel.or(self.uploader).unwrap_or_default(),
                channel_id: self.channel_id.unwrap_or_default(),
                thumbnail_url,
                metadata_json: Some(raw),
                view_count: self.view_count.unwrap_or(0),
                duration: self.duration.map(|d| d as i64).unwrap_or(0),
                upload_date: self.upload_date.as_deref().and_then(parse_upload_date),
                live_start_time,
                live_end_time: self.live_end_time.and_then(unix_seconds),
                is_live: self.is_live.unwrap_or(false)
                    || self.live_status.as_deref() == Some("is_live"),
            },
            id: self.id,
        }
    }
}

/// Parse an 8-digit `YYYYMMDD` upload date as midnight UTC.
pub fn parse_upload_date(s: &str) -> Option<DateTime<Utc>> {
    if s.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}

fn unix_seconds(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}
