//! Ingestion engine: one pass over one playlist. Lists the remote items,
//! fetches the ones the store has not seen, and records them.

pub mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fetch::MediaTool;
use crate::state::StateDb;

pub use error::IngestError;

/// Counts for one pass. `seen == skipped + downloaded + failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub seen: usize,
    pub skipped: usize,
    pub downloaded: usize,
    pub failed: usize,
}

impl PassReport {
    pub fn changed(&self) -> bool {
        self.downloaded > 0
    }
}

/// Pull the playlist id out of a configured source.
///
/// Accepts a bare id or any URL carrying a `list=` query parameter.
pub fn extract_playlist_id(source: &str) -> Option<String> {
    let source = source.trim();
    if source.is_empty() {
        return None;
    }
    if let Some((_, query)) = source.split_once('?') {
        return query
            .split(['&', '#'])
            .find_map(|pair| pair.strip_prefix("list="))
            .filter(|id| !id.is_empty())
            .map(str::to_string);
    }
    if source.contains('/') || source.chars().any(char::is_whitespace) {
        return None;
    }
    Some(source.to_string())
}

/// Directory for a playlist's files. Path separators in the display name
/// are replaced so every playlist stays directly under the media root.
pub fn playlist_dir(media_root: &Path, name: &str) -> PathBuf {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => media_root.join("_"),
        _ => media_root.join(cleaned),
    }
}

pub struct Ingestor {
    store: Arc<dyn StateDb>,
    tool: Arc<dyn MediaTool>,
    media_root: PathBuf,
}

impl Ingestor {
    pub fn new(store: Arc<dyn StateDb>, tool: Arc<dyn MediaTool>, media_root: PathBuf) -> Self {
        Self {
            store,
            tool,
            media_root,
        }
    }

    /// Run one pass over the playlist at `source`, stored under `name`.
    ///
    /// Items are handled in listing order. `on_item(id, downloaded)` is
    /// called once per item after its state is persisted: `false` for items
    /// already known, `true` for items fetched in this pass. Failed items get
    /// no callback and are retried on the next pass.
    pub async fn process_playlist<F>(
        &self,
        source: &str,
        name: &str,
        mut on_item: F,
    ) -> Result<PassReport, IngestError>
    where
        F: FnMut(&str, bool) + Send,
    {
        let playlist_id = extract_playlist_id(source)
            .ok_or_else(|| IngestError::InvalidReference(source.to_string()))?;
        let store_err = |e| IngestError::Store {
            playlist: playlist_id.clone(),
            source: e,
        };

        self.store
            .get_or_create_playlist(&playlist_id, name)
            .await
            .map_err(store_err)?;

        let items = self.tool.list(source).await?;
        tracing::debug!(playlist = %playlist_id, count = items.len(), "Listed playlist");

        let dir = playlist_dir(&self.media_root, name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| IngestError::Directory {
                path: dir.clone(),
                source: e,
            })?;

        let mut report = PassReport::default();
        for item in &items {
            report.seen += 1;
            match self.store.item_exists(&item.id).await {
                Ok(true) => {
                    report.skipped += 1;
                    on_item(&item.id, false);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(playlist = %playlist_id, item = %item.id, error = %e, "Existence check failed");
                    report.failed += 1;
                    continue;
                }
            }

            let fetched = match self.tool.fetch(&item.id, &dir).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(playlist = %playlist_id, item = %e.item(), error = %e, "Fetch failed");
                    report.failed += 1;
                    continue;
                }
            };

            if let Err(e) = self
                .store
                .add_item(&item.id, &playlist_id, name, &item.metadata)
                .await
            {
                tracing::warn!(
                    playlist = %playlist_id,
                    item = %item.id,
                    path = %fetched.path.display(),
                    error = %e,
                    "Failed to record fetched item"
                );
                report.failed += 1;
                continue;
            }
            // The row exists now. If this fails the item stays pending with no
            // file path; validation skips it and later passes will not refetch it.
            if let Err(e) = self
                .store
                .update_file_info(&item.id, &fetched.path, fetched.size)
                .await
            {
                tracing::warn!(playlist = %playlist_id, item = %item.id, error = %e, "Failed to record file info");
            }

            report.downloaded += 1;
            tracing::info!(
                playlist = %playlist_id,
                item = %item.id,
                path = %fetched.path.display(),
                size = fetched.size,
                "Downloaded"
            );
            on_item(&item.id, true);
        }

        if let Err(e) = self.store.mark_playlist_checked(&playlist_id).await {
            tracing::warn!(playlist = %playlist_id, error = %e, "Failed to mark playlist checked");
        }

        tracing::info!(
            playlist = %playlist_id,
            name = %name,
            seen = report.seen,
            skipped = report.skipped,
            downloaded = report.downloaded,
            failed = report.failed,
            "Pass complete"
        );
        Ok(report)
    }
}
