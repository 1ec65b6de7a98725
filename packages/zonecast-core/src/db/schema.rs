//! Table definitions.

use sqlx::SqlitePool;

use super::StoreResult;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS environments (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        timezone TEXT NOT NULL,
        household_id TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS zones (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        environment_id TEXT NOT NULL REFERENCES environments(id) ON DELETE CASCADE,
        device_player_ids TEXT NOT NULL DEFAULT '[]',
        sonos_group_id TEXT,
        group_id_cached_at TEXT,
        group_id_cache_ttl_minutes INTEGER NOT NULL DEFAULT 30
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY,
        zone_id TEXT NOT NULL REFERENCES zones(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        playlist_uri TEXT NOT NULL,
        days_of_week TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT,
        enabled INTEGER NOT NULL DEFAULT 1
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_schedules_zone ON schedules(zone_id, start_time)",
    r#"
    CREATE TABLE IF NOT EXISTS song_requests (
        id TEXT PRIMARY KEY,
        zone_id TEXT NOT NULL REFERENCES zones(id) ON DELETE CASCADE,
        track_uri TEXT NOT NULL,
        track_name TEXT,
        requested_by TEXT,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'playing', 'completed', 'failed')),
        created_at TEXT NOT NULL,
        played_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_song_requests_queue ON song_requests(zone_id, status, created_at)",
    // At most one playing request per zone.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_song_requests_one_playing
        ON song_requests(zone_id) WHERE status = 'playing'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS playback_state (
        zone_id TEXT PRIMARY KEY REFERENCES zones(id) ON DELETE CASCADE,
        current_activity TEXT NOT NULL DEFAULT 'idle'
            CHECK (current_activity IN ('idle', 'scheduled', 'visitor_request')),
        interrupted_schedule_id TEXT,
        interrupted_at TEXT,
        interrupted_track TEXT,
        interrupted_position_ms INTEGER,
        last_updated TEXT NOT NULL
    )
    "#,
];

/// Creates all tables and indexes that do not exist yet.
pub(crate) async fn create_tables(pool: &SqlitePool) -> StoreResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    log::debug!("[Database] Schema ensured ({} statements)", STATEMENTS.len());
    Ok(())
}
