//! Periodic on-disk validation of recorded files.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::state::{StateDb, StateError, SweepStats};

/// Default period between validation passes.
pub const VALIDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Validator {
    store: Arc<dyn StateDb>,
    max_age: Duration,
    interval: Duration,
    cleanup: bool,
}

impl Validator {
    pub fn new(store: Arc<dyn StateDb>, interval: Duration, max_age: Duration) -> Self {
        Self {
            store,
            max_age,
            interval,
            cleanup: false,
        }
    }

    /// Also remove rows whose files are confirmed gone after each sweep.
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Sweep every recorded file if any is stale or was never validated.
    ///
    /// Returns `None` when nothing needed validation.
    pub async fn run_validation(&self) -> Result<Option<SweepStats>, StateError> {
        let stale = self.store.items_needing_validation(self.max_age).await?;
        if stale.is_empty() {
            tracing::debug!("No items need validation");
            return Ok(None);
        }

        tracing::info!(stale = stale.len(), "Validating recorded files");
        let stats = self.store.validate_all_files().await?;
        tracing::info!(
            checked = stats.checked,
            valid = stats.valid,
            missing = stats.missing,
            error = stats.error,
            "Validation complete"
        );
        Ok(Some(stats))
    }

    /// Delete rows marked missing whose file is still absent.
    ///
    /// A file that reappeared since the sweep keeps its row; the next sweep
    /// marks it valid again.
    pub async fn cleanup_missing_files(&self) -> Result<u64, StateError> {
        let missing = self.store.missing_items().await?;
        let mut gone = Vec::new();
        for (id, path) in missing {
            match tokio::fs::metadata(&path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(item = %id, path = %path.display(), "Removing record of missing file");
                    gone.push(id);
                }
                Err(e) => {
                    tracing::warn!(item = %id, path = %path.display(), error = %e, "Cannot stat file, keeping record");
                }
                Ok(_) => {
                    tracing::info!(item = %id, path = %path.display(), "File reappeared, keeping record");
                }
            }
        }

        if gone.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.delete_items(&gone).await?;
        tracing::info!(deleted, "Removed records of missing files");
        Ok(deleted)
    }

    async fn pass(&self) {
        match self.run_validation().await {
            Ok(Some(_)) if self.cleanup => {
                if let Err(e) = self.cleanup_missing_files().await {
                    tracing::error!(error = %e, "Cleanup of missing files failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Validation failed"),
        }
    }

    /// Validate now, then every `interval`, until `token` is cancelled.
    ///
    /// A sweep that has started is finished before cancellation is observed.
    pub async fn run(self, token: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            cleanup = self.cleanup,
            "Validator started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => self.pass().await,
            }
        }
        tracing::info!("Validator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::ValidationStatus;
    use crate::state::{ItemMetadata, SqliteStateDb};

    async fn store_with_file(dir: &std::path::Path) -> (Arc<SqliteStateDb>, std::path::PathBuf) {
        let store = Arc::new(SqliteStateDb::open_in_memory().unwrap());
        let path = dir.join("Song [a].mp3");
        std::fs::write(&path, b"audio").unwrap();
        store
            .add_item("a", "PL1", "Mix", &ItemMetadata::default())
            .await
            .unwrap();
        store.update_file_info("a", &path, 5).await.unwrap();
        (store, path)
    }

    #[tokio::test]
    async fn test_valid_missing_then_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(dir.path()).await;
        let validator = Validator::new(store.clone(), VALIDATE_INTERVAL, Duration::ZERO);

        let stats = validator.run_validation().await.unwrap().unwrap();
        assert_eq!(stats.valid, 1);
        let item = store.get_item("a").await.unwrap().unwrap();
        assert_eq!(item.validation_status, ValidationStatus::Valid);

        std::fs::remove_file(&path).unwrap();
        let stats = validator.run_validation().await.unwrap().unwrap();
        assert_eq!(stats.missing, 1);
        let item = store.get_item("a").await.unwrap().unwrap();
        assert_eq!(item.validation_status, ValidationStatus::Missing);

        assert_eq!(validator.cleanup_missing_files().await.unwrap(), 1);
        assert!(store.get_item("a").await.unwrap().is_none());
        assert_eq!(
            store.get_playlist("PL1").await.unwrap().unwrap().item_count,
            0
        );
    }

    #[tokio::test]
    async fn test_cleanup_keeps_reappeared_file() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(dir.path()).await;
        let validator = Validator::new(store.clone(), VALIDATE_INTERVAL, Duration::ZERO);

        std::fs::remove_file(&path).unwrap();
        validator.run_validation().await.unwrap();
        std::fs::write(&path, b"restored").unwrap();

        assert_eq!(validator.cleanup_missing_files().await.unwrap(), 0);
        assert!(store.item_exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_fresh_records_skip_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _path) = store_with_file(dir.path()).await;
        let validator = Validator::new(store, VALIDATE_INTERVAL, Duration::from_secs(7 * 24 * 3600));

        // update_file_info validates, so nothing is stale yet
        assert_eq!(validator.run_validation().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_sweeps_with_cleanup_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (store, path) = store_with_file(dir.path()).await;
        std::fs::remove_file(&path).unwrap();

        let validator =
            Validator::new(store.clone(), Duration::from_secs(3600), Duration::ZERO).with_cleanup(true);
        let token = CancellationToken::new();
        let handle = tokio::spawn(validator.run(token.clone()));

        for _ in 0..100 {
            if !store.item_exists("a").await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!store.item_exists("a").await.unwrap());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
