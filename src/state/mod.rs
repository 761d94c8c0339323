//! Persistent state for watched playlists and their items.
//!
//! SQLite-backed record of every playlist seen, every item fetched, and the
//! last known presence of each item's file on disk. It backs:
//! - Skip-by-DB ingestion (an item is fetched at most once)
//! - Per-playlist item counts derived from item rows
//! - Periodic file validation and cleanup of vanished files

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteStateDb, StateDb};
pub use error::StateError;
pub use types::{ItemMetadata, SweepStats};
