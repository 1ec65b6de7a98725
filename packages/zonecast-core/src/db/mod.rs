//! SQLite persistence for zones, schedules, visitor requests and playback state.
//!
//! # Module Structure
//!
//! - `schema` - Idempotent table creation
//! - `models` - Decoded record types and column codecs
//! - `zones` - Environments, zones and the group-id cache
//! - `schedules` - Schedule rows joined with their environment's time zone
//! - `requests` - Visitor request lifecycle (conditional transitions)
//! - `playback` - Per-zone orchestration state

mod models;
mod playback;
mod requests;
mod schedules;
mod schema;
mod zones;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

pub use models::{
    parse_time_of_day, parse_timezone, Activity, Environment, Interruption, PlaybackState,
    RequestStatus, Schedule, SongRequest, Zone, ZoneTarget, DEFAULT_GROUP_CACHE_TTL_MINUTES,
};
pub use requests::NewSongRequest;
pub use schedules::{NewSchedule, ZoneSchedule};
pub use zones::{NewEnvironment, NewZone};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored value could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A value supplied for writing is malformed.
    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Convenient Result alias for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the orchestration database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database file at `path` and ensures the schema.
    pub async fn connect(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Invalid(format!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        log::info!("[Database] Opening {}", url);

        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Opens a private in-memory database. Used by tests and the `report` dry run.
    ///
    /// A single connection is kept alive for the pool's lifetime: every new
    /// `:memory:` connection would otherwise see an empty database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating tables if they are missing.
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        schema::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool, for ad-hoc queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Returns true if the error is a uniqueness constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creation_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        schema::create_tables(db.pool()).await.unwrap();
        schema::create_tables(db.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn connect_creates_file_database() {
        let dir = std::env::temp_dir().join(format!("zonecast-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("zonecast.db");
        let db = Database::connect(&path).await.unwrap();
        assert!(path.exists());
        db.close().await;
        let _ = std::fs::remove_dir_all(dir);
    }
}
