//! State database trait and SQLite implementation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{
    from_opt_timestamp, from_timestamp, to_timestamp, ItemMetadata, ItemRecord, Playlist,
    PlaylistSummary, SweepStats, ValidationStatus,
};

/// Trait for state database operations.
///
/// Object-safe so it can be shared as `Arc<dyn StateDb>` between the
/// ingestion passes and the validator.
#[async_trait]
pub trait StateDb: Send + Sync {
    /// Return the playlist with this external id, creating it if unknown.
    ///
    /// An existing row has its title replaced when `title` differs.
    async fn get_or_create_playlist(
        &self,
        external_id: &str,
        title: &str,
    ) -> Result<Playlist, StateError>;

    /// Whether an item with this external id is recorded.
    async fn item_exists(&self, external_id: &str) -> Result<bool, StateError>;

    /// Insert or update an item and recompute the owning playlist's count.
    ///
    /// On conflict every metadata field is overwritten. File fields and
    /// validation status are left as they are.
    async fn add_item(
        &self,
        external_id: &str,
        playlist_external_id: &str,
        playlist_title: &str,
        metadata: &ItemMetadata,
    ) -> Result<(), StateError>;

    /// Record the downloaded file for an item and mark it valid.
    ///
    /// Returns [`StateError::ItemNotFound`] if the item row does not exist.
    async fn update_file_info(
        &self,
        external_id: &str,
        path: &Path,
        size: u64,
    ) -> Result<(), StateError>;

    /// Bump `last_checked` and recompute the item count after a pass.
    async fn mark_playlist_checked(&self, playlist_external_id: &str) -> Result<(), StateError>;

    /// Items with a recorded file that were never validated, or were last
    /// validated at least `max_age` ago. A zero `max_age` selects every file.
    async fn items_needing_validation(&self, max_age: Duration)
        -> Result<Vec<String>, StateError>;

    /// Stat every recorded file and store the outcome.
    ///
    /// All rows touched by one sweep share the same validation timestamp.
    async fn validate_all_files(&self) -> Result<SweepStats, StateError>;

    /// External ids and paths of items currently marked missing.
    async fn missing_items(&self) -> Result<Vec<(String, PathBuf)>, StateError>;

    /// Delete items by external id, returning how many rows were removed.
    async fn delete_items(&self, external_ids: &[String]) -> Result<u64, StateError>;

    async fn get_item(&self, external_id: &str) -> Result<Option<ItemRecord>, StateError>;

    async fn get_playlist(&self, external_id: &str) -> Result<Option<Playlist>, StateError>;

    /// Every playlist with its per-status item counts, ordered by title.
    async fn summary(&self) -> Result<Vec<PlaylistSummary>, StateError>;
}

/// SQLite implementation of the state database.
pub struct SqliteStateDb {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStateDb {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL lets the status command read while a pass is writing
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;
            configure(&conn)?;
            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        configure(&conn)?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Get the path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn.lock().map_err(StateError::poisoned)
    }
}

fn configure(conn: &Connection) -> Result<(), StateError> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(StateError::Migration)?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(StateError::Migration)?;
    Ok(())
}

/// Run `f` inside an immediate transaction, rolling back on any error.
fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, StateError>,
) -> Result<T, StateError> {
    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(StateError::query)?;

    let result = f(conn).and_then(|value| {
        conn.execute_batch("COMMIT").map_err(StateError::query)?;
        Ok(value)
    });

    if result.is_err() {
        let _ = conn.execute_batch("ROLLBACK");
    }
    result
}

const PLAYLIST_COLUMNS: &str =
    "id, external_id, title, item_count, last_checked, created_at, updated_at";

fn row_to_playlist(row: &rusqlite::Row<'_>) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        item_count: row.get::<_, i64>(3)? as u64,
        last_checked: from_opt_timestamp(row.get(4)?),
        created_at: from_timestamp(row.get(5)?),
        updated_at: from_timestamp(row.get(6)?),
    })
}

fn find_playlist(conn: &Connection, external_id: &str) -> Result<Option<Playlist>, StateError> {
    conn.query_row(
        &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE external_id = ?1"),
        [external_id],
        row_to_playlist,
    )
    .optional()
    .map_err(StateError::query)
}

fn get_or_create_playlist_in(
    conn: &Connection,
    external_id: &str,
    title: &str,
    now: DateTime<Utc>,
) -> Result<Playlist, StateError> {
    let ts = to_timestamp(&now);

    if let Some(mut playlist) = find_playlist(conn, external_id)? {
        if playlist.title != title {
            conn.execute(
                "UPDATE playlists SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, ts, playlist.id],
            )
            .map_err(StateError::query)?;
            tracing::debug!(
                playlist = %external_id,
                from = %playlist.title,
                to = %title,
                "Playlist title changed"
            );
            playlist.title = title.to_string();
            playlist.updated_at = from_timestamp(ts);
        }
        return Ok(playlist);
    }

    conn.execute(
        "INSERT INTO playlists (external_id, title, item_count, last_checked, created_at, updated_at)
         VALUES (?1, ?2, 0, NULL, ?3, ?3)",
        params![external_id, title, ts],
    )
    .map_err(StateError::query)?;

    Ok(Playlist {
        id: conn.last_insert_rowid(),
        external_id: external_id.to_string(),
        title: title.to_string(),
        item_count: 0,
        last_checked: None,
        created_at: from_timestamp(ts),
        updated_at: from_timestamp(ts),
    })
}

/// Recompute `item_count` from item rows for each playlist row id.
fn recount_playlists(
    conn: &Connection,
    playlist_ids: &BTreeSet<i64>,
    ts: i64,
) -> Result<(), StateError> {
    let mut stmt = conn
        .prepare_cached(
            "UPDATE playlists
             SET item_count = (SELECT COUNT(*) FROM items WHERE playlist_id = ?1),
                 updated_at = ?2
             WHERE id = ?1",
        )
        .map_err(StateError::query)?;
    for id in playlist_ids {
        stmt.execute(params![id, ts]).map_err(StateError::query)?;
    }
    Ok(())
}

fn owning_playlist(conn: &Connection, item_external_id: &str) -> Result<Option<i64>, StateError> {
    conn.query_row(
        "SELECT playlist_id FROM items WHERE external_id = ?1",
        [item_external_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(StateError::query)
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRecord> {
    let file_path: Option<String> = row.get(15)?;
    let status: String = row.get(18)?;
    Ok(ItemRecord {
        external_id: row.get(0)?,
        playlist_external_id: row.get(1)?,
        playlist_title: row.get(2)?,
        metadata: ItemMetadata {
            title: row.get(3)?,
            description: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            channel: row.get(5)?,
            channel_id: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            duration: row.get(7)?,
            view_count: row.get(8)?,
            thumbnail_url: row.get(9)?,
            upload_date: from_opt_timestamp(row.get(10)?),
            is_live: row.get(11)?,
            live_start_time: from_opt_timestamp(row.get(12)?),
            live_end_time: from_opt_timestamp(row.get(13)?),
            metadata_json: row.get(14)?,
        },
        file_path: file_path.filter(|p| !p.is_empty()).map(PathBuf::from),
        file_size: row.get::<_, i64>(16)? as u64,
        last_validated: from_opt_timestamp(row.get(17)?),
        validation_status: ValidationStatus::from_str(&status)
            .unwrap_or(ValidationStatus::Pending),
        created_at: from_timestamp(row.get(19)?),
        updated_at: from_timestamp(row.get(20)?),
    })
}

#[async_trait]
impl StateDb for SqliteStateDb {
    async fn get_or_create_playlist(
        &self,
        external_id: &str,
        title: &str,
    ) -> Result<Playlist, StateError> {
        let conn = self.lock()?;
        in_transaction(&conn, |conn| {
            get_or_create_playlist_in(conn, external_id, title, Utc::now())
        })
    }

    async fn item_exists(&self, external_id: &str) -> Result<bool, StateError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM items WHERE external_id = ?1)",
            [external_id],
            |row| row.get(0),
        )
        .map_err(StateError::query)
    }

    async fn add_item(
        &self,
        external_id: &str,
        playlist_external_id: &str,
        playlist_title: &str,
        metadata: &ItemMetadata,
    ) -> Result<(), StateError> {
        let now = Utc::now();
        let ts = to_timestamp(&now);
        let conn = self.lock()?;

        in_transaction(&conn, |conn| {
            let playlist =
                get_or_create_playlist_in(conn, playlist_external_id, playlist_title, now)?;
            let previous_owner = owning_playlist(conn, external_id)?;

            conn.execute(
                r#"
                INSERT INTO items (
                    external_id, playlist_id, playlist_title, title, description,
                    channel, channel_id, duration, view_count, thumbnail_url,
                    upload_date, is_live, live_start_time, live_end_time, metadata_json,
                    validation_status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 'pending', ?16, ?16)
                ON CONFLICT(external_id) DO UPDATE SET
                    playlist_id = excluded.playlist_id,
                    playlist_title = excluded.playlist_title,
                    title = excluded.title,
                    description = excluded.description,
                    channel = excluded.channel,
                    channel_id = excluded.channel_id,
                    duration = excluded.duration,
                    view_count = excluded.view_count,
                    thumbnail_url = excluded.thumbnail_url,
                    upload_date = excluded.upload_date,
                    is_live = excluded.is_live,
                    live_start_time = excluded.live_start_time,
                    live_end_time = excluded.live_end_time,
                    metadata_json = excluded.metadata_json,
                    updated_at = excluded.updated_at
                "#,
                params![
                    external_id,
                    playlist.id,
                    playlist_title,
                    &metadata.title,
                    &metadata.description,
                    &metadata.channel,
                    &metadata.channel_id,
                    metadata.duration,
                    metadata.view_count,
                    &metadata.thumbnail_url,
                    metadata.upload_date.as_ref().map(to_timestamp),
                    metadata.is_live,
                    metadata.live_start_time.as_ref().map(to_timestamp),
                    metadata.live_end_time.as_ref().map(to_timestamp),
                    &metadata.metadata_json,
                    ts,
                ],
            )
            .map_err(StateError::query)?;

            // An item moved between playlists changes two counts
            let mut touched = BTreeSet::from([playlist.id]);
            touched.extend(previous_owner);
            recount_playlists(conn, &touched, ts)
        })
    }

    async fn update_file_info(
        &self,
        external_id: &str,
        path: &Path,
        size: u64,
    ) -> Result<(), StateError> {
        let ts = Utc::now().timestamp();
        let conn = self.lock()?;

        let rows = conn
            .execute(
                "UPDATE items
                 SET file_path = ?1, file_size = ?2, validation_status = 'valid',
                     last_validated = ?3, downloaded_at = ?3, updated_at = ?3
                 WHERE external_id = ?4",
                params![path.to_string_lossy(), size as i64, ts, external_id],
            )
            .map_err(StateError::query)?;

        if rows == 0 {
            return Err(StateError::ItemNotFound(external_id.to_string()));
        }
        Ok(())
    }

    async fn mark_playlist_checked(&self, playlist_external_id: &str) -> Result<(), StateError> {
        let ts = Utc::now().timestamp();
        let conn = self.lock()?;

        conn.execute(
            "UPDATE playlists
             SET last_checked = ?1,
                 updated_at = ?1,
                 item_count = (SELECT COUNT(*) FROM items WHERE items.playlist_id = playlists.id)
             WHERE external_id = ?2",
            params![ts, playlist_external_id],
        )
        .map_err(StateError::query)?;
        Ok(())
    }

    async fn items_needing_validation(
        &self,
        max_age: Duration,
    ) -> Result<Vec<String>, StateError> {
        let age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(age);
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT external_id FROM items
                 WHERE file_path IS NOT NULL AND file_path != ''
                   AND (last_validated IS NULL OR last_validated <= ?1)",
            )
            .map_err(StateError::query)?;

        let ids = stmt
            .query_map([cutoff], |row| row.get(0))
            .map_err(StateError::query)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(StateError::query)?;
        Ok(ids)
    }

    async fn validate_all_files(&self) -> Result<SweepStats, StateError> {
        let ts = Utc::now().timestamp();
        let files: Vec<(String, String)> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare_cached(
                    "SELECT external_id, file_path FROM items
                     WHERE file_path IS NOT NULL AND file_path != ''",
                )
                .map_err(StateError::query)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(StateError::query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StateError::query)?;
            rows
        };

        // Stat without holding the connection lock
        let checked = tokio::task::spawn_blocking(move || {
            files
                .into_iter()
                .map(|(external_id, file_path)| {
                    let stat = std::fs::metadata(&file_path);
                    let status = ValidationStatus::from_stat(&stat);
                    match (status, &stat) {
                        (ValidationStatus::Missing, _) => {
                            tracing::warn!(item = %external_id, path = %file_path, "File missing");
                        }
                        (ValidationStatus::Error, Err(e)) => {
                            tracing::warn!(
                                item = %external_id,
                                path = %file_path,
                                error = %e,
                                "Failed to check file"
                            );
                        }
                        _ => {}
                    }
                    (external_id, file_path, status)
                })
                .collect::<Vec<_>>()
        })
        .await?;

        let conn = self.lock()?;
        in_transaction(&conn, |conn| {
            // Rows re-pointed at another file during the stat are left alone
            let mut update = conn
                .prepare_cached(
                    "UPDATE items SET validation_status = ?1, last_validated = ?2, updated_at = ?2
                     WHERE external_id = ?3 AND file_path = ?4",
                )
                .map_err(StateError::query)?;

            let mut stats = SweepStats::default();
            for (external_id, file_path, status) in &checked {
                stats.record(*status);
                update
                    .execute(params![status.as_str(), ts, external_id, file_path])
                    .map_err(StateError::query)?;
            }
            Ok(stats)
        })
    }

    async fn missing_items(&self) -> Result<Vec<(String, PathBuf)>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT external_id, file_path FROM items
                 WHERE validation_status = 'missing' AND file_path IS NOT NULL AND file_path != ''",
            )
            .map_err(StateError::query)?;

        let items = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, PathBuf::from(row.get::<_, String>(1)?)))
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;
        Ok(items)
    }

    async fn delete_items(&self, external_ids: &[String]) -> Result<u64, StateError> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let ts = Utc::now().timestamp();
        let conn = self.lock()?;

        in_transaction(&conn, |conn| {
            let mut touched = BTreeSet::new();
            let mut deleted = 0u64;
            for external_id in external_ids {
                let Some(playlist_id) = owning_playlist(conn, external_id)? else {
                    continue;
                };
                deleted += conn
                    .execute("DELETE FROM items WHERE external_id = ?1", [external_id])
                    .map_err(StateError::query)? as u64;
                touched.insert(playlist_id);
            }
            recount_playlists(conn, &touched, ts)?;
            Ok(deleted)
        })
    }

    async fn get_item(&self, external_id: &str) -> Result<Option<ItemRecord>, StateError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT i.external_id, p.external_id, i.playlist_title, i.title, i.description,
                    i.channel, i.channel_id, i.duration, i.view_count, i.thumbnail_url,
                    i.upload_date, i.is_live, i.live_start_time, i.live_end_time, i.metadata_json,
                    i.file_path, i.file_size, i.last_validated, i.validation_status,
                    i.created_at, i.updated_at
             FROM items i JOIN playlists p ON p.id = i.playlist_id
             WHERE i.external_id = ?1",
            [external_id],
            row_to_item,
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn get_playlist(&self, external_id: &str) -> Result<Option<Playlist>, StateError> {
        let conn = self.lock()?;
        find_playlist(&conn, external_id)
    }

    async fn summary(&self) -> Result<Vec<PlaylistSummary>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT p.id, p.external_id, p.title, p.item_count, p.last_checked,
                        p.created_at, p.updated_at,
                        COALESCE(SUM(i.validation_status = 'valid'), 0),
                        COALESCE(SUM(i.validation_status = 'pending'), 0),
                        COALESCE(SUM(i.validation_status = 'missing'), 0),
                        COALESCE(SUM(i.validation_status = 'error'), 0)
                 FROM playlists p LEFT JOIN items i ON i.playlist_id = p.id
                 GROUP BY p.id
                 ORDER BY p.title",
            )
            .map_err(StateError::query)?;

        let summaries = stmt
            .query_map([], |row| {
                Ok(PlaylistSummary {
                    playlist: row_to_playlist(row)?,
                    valid: row.get::<_, i64>(7)? as u64,
                    pending: row.get::<_, i64>(8)? as u64,
                    missing: row.get::<_, i64>(9)? as u64,
                    error: row.get::<_, i64>(10)? as u64,
                })
            })
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;
        Ok(summaries)
    }
}
