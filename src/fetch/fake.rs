//! In-process [`MediaTool`] for tests. Fetches write real files so the
//! store and validator see them on disk.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FetchError, FetchedFile, ListError, MediaTool, RemoteItem};
use crate::state::ItemMetadata;

#[derive(Default)]
pub(crate) struct FakeTool {
    items: Mutex<Vec<RemoteItem>>,
    /// Per-reference listings; references not present get `items`.
    listings: Mutex<HashMap<String, Vec<RemoteItem>>>,
    failing: Mutex<HashSet<String>>,
    list_fails: Mutex<bool>,
    list_panics: Mutex<bool>,
    fetched: Mutex<Vec<String>>,
}

impl FakeTool {
    pub(crate) fn with_items(ids: &[&str]) -> Self {
        let tool = Self::default();
        tool.set_items(ids);
        tool
    }

    pub(crate) fn set_items(&self, ids: &[&str]) {
        *self.items.lock().unwrap() = remote_items(ids);
    }

    pub(crate) fn set_listing(&self, reference: &str, ids: &[&str]) {
        self.listings
            .lock()
            .unwrap()
            .insert(reference.to_string(), remote_items(ids));
    }

    pub(crate) fn fail_item(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub(crate) fn fail_listing(&self) {
        *self.list_fails.lock().unwrap() = true;
    }

    pub(crate) fn panic_on_listing(&self) {
        *self.list_panics.lock().unwrap() = true;
    }

    /// Ids passed to `fetch`, in call order.
    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

fn remote_items(ids: &[&str]) -> Vec<RemoteItem> {
    ids.iter()
        .map(|id| RemoteItem {
            id: (*id).to_string(),
            metadata: ItemMetadata {
                title: format!("Title {id}"),
                channel: "Channel".into(),
                duration: 180,
                ..Default::default()
            },
        })
        .collect()
}

#[async_trait]
impl MediaTool for FakeTool {
    async fn list(&self, reference: &str) -> Result<Vec<RemoteItem>, ListError> {
        if *self.list_fails.lock().unwrap() {
            return Err(ListError::Exit {
                reference: reference.to_string(),
                status: "exit status: 1".into(),
                output: "ERROR: The playlist does not exist.".into(),
            });
        }
        if *self.list_panics.lock().unwrap() {
            panic!("listing {reference} blew up");
        }
        if let Some(items) = self.listings.lock().unwrap().get(reference) {
            return Ok(items.clone());
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn fetch(&self, item_id: &str, dest_dir: &Path) -> Result<FetchedFile, FetchError> {
        self.fetched.lock().unwrap().push(item_id.to_string());
        if self.failing.lock().unwrap().contains(item_id) {
            return Err(FetchError::Exit {
                item: item_id.to_string(),
                status: "exit status: 1".into(),
                output: "ERROR: Video unavailable".into(),
            });
        }

        let path = dest_dir.join(format!("Title {item_id} [{item_id}].mp3"));
        let bytes = format!("audio for {item_id}");
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| FetchError::Stat {
                item: item_id.to_string(),
                path: path.clone(),
                source: e,
            })?;
        Ok(FetchedFile {
            path,
            size: bytes.len() as u64,
        })
    }
}
