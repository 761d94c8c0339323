//! Adaptive scheduler. A driver ticks once a minute and launches a pass for
//! every playlist whose cadence says it is due. Passes run as independent
//! tasks; a playlist never has two passes in flight.

pub mod cadence;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::{extract_playlist_id, Ingestor};

pub use cadence::{CadencePolicy, CadenceState};

/// Driver tick period.
pub const TICK: Duration = Duration::from_secs(60);

/// A configured playlist: display name and source URL or id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedPlaylist {
    pub name: String,
    pub source: String,
}

struct Entry {
    playlist: WatchedPlaylist,
    cadence: Arc<Mutex<CadenceState>>,
}

pub struct Scheduler {
    ingestor: Arc<Ingestor>,
    policy: CadencePolicy,
    /// Keyed by playlist id so renaming a playlist keeps its cadence.
    entries: HashMap<String, Entry>,
}

impl Scheduler {
    pub fn new(
        ingestor: Arc<Ingestor>,
        policy: CadencePolicy,
        playlists: impl IntoIterator<Item = WatchedPlaylist>,
    ) -> Self {
        let mut entries = HashMap::new();
        for playlist in playlists {
            let Some(id) = extract_playlist_id(&playlist.source) else {
                tracing::warn!(name = %playlist.name, source = %playlist.source, "Skipping playlist without an id");
                continue;
            };
            if let Some(previous) = entries.get(&id).map(|e: &Entry| e.playlist.name.clone()) {
                tracing::warn!(playlist = %id, previous = %previous, name = %playlist.name, "Playlist configured twice, keeping the last entry");
            }
            entries.insert(
                id,
                Entry {
                    playlist,
                    cadence: Arc::new(Mutex::new(CadenceState::default())),
                },
            );
        }
        Self {
            ingestor,
            policy,
            entries,
        }
    }

    /// Launch a pass for every due playlist, or every idle one when `force`.
    ///
    /// Playlists with a pass in flight are skipped even when forced.
    pub fn dispatch_due(&self, now: DateTime<Utc>, force: bool) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for (id, entry) in &self.entries {
            {
                let mut cadence = entry.cadence.lock().unwrap_or_else(PoisonError::into_inner);
                let due = if force {
                    !cadence.in_flight
                } else {
                    cadence.is_due(&self.policy, now)
                };
                if !due {
                    continue;
                }
                tracing::debug!(
                    playlist = %id,
                    name = %entry.playlist.name,
                    interval_secs = cadence.current_interval(&self.policy, now).as_secs(),
                    "Dispatching pass"
                );
                cadence.start_pass();
            }
            handles.push(tokio::spawn(run_pass(
                self.ingestor.clone(),
                entry.playlist.clone(),
                entry.cadence.clone(),
            )));
        }
        handles
    }

    /// Drive passes until `token` is cancelled. The first dispatch is forced.
    ///
    /// Returns as soon as cancellation is observed; passes already running
    /// finish on their own.
    pub async fn run(self, token: CancellationToken) {
        tracing::info!(playlists = self.entries.len(), "Scheduler started");
        self.dispatch_due(Utc::now(), true);

        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.dispatch_due(Utc::now(), false);
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }

    #[cfg(test)]
    fn cadence(&self, id: &str) -> Option<CadenceState> {
        self.entries
            .get(id)
            .map(|e| e.cadence.lock().unwrap().clone())
    }
}

/// Completes the cadence when dropped, so a pass that panics does not leave
/// its playlist stuck in flight.
struct PassGuard {
    cadence: Arc<Mutex<CadenceState>>,
    changed: bool,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.cadence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .complete_pass(Utc::now(), self.changed);
    }
}

async fn run_pass(
    ingestor: Arc<Ingestor>,
    playlist: WatchedPlaylist,
    cadence: Arc<Mutex<CadenceState>>,
) {
    let mut guard = PassGuard {
        cadence,
        changed: false,
    };
    let result = ingestor
        .process_playlist(&playlist.source, &playlist.name, |_, downloaded| {
            guard.changed |= downloaded;
        })
        .await;
    match result {
        Ok(report) => {
            tracing::debug!(name = %playlist.name, changed = report.changed(), "Pass finished");
        }
        Err(e) => {
            tracing::error!(name = %playlist.name, error = %e, "Playlist pass failed");
        }
    }
}
