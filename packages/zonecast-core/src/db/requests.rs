//! Visitor request lifecycle.
//!
//! Every transition is a conditional `UPDATE` that reports whether it took
//! effect, so an overlapping tick can never promote the same request twice.
//! The partial unique index on `(zone_id) WHERE status = 'playing'` backs this
//! up at the storage layer.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::models::{decode_optional_timestamp, decode_timestamp, encode_timestamp};
use super::{is_unique_violation, Database, RequestStatus, SongRequest, StoreResult};

/// Input for [`Database::insert_request`].
#[derive(Debug, Clone)]
pub struct NewSongRequest {
    /// Generated when `None`.
    pub id: Option<String>,
    pub zone_id: String,
    pub track_uri: String,
    pub track_name: Option<String>,
    pub requested_by: Option<String>,
}

fn request_from_row(row: &SqliteRow) -> StoreResult<SongRequest> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(SongRequest {
        id: row.try_get("id")?,
        zone_id: row.try_get("zone_id")?,
        track_uri: row.try_get("track_uri")?,
        track_name: row.try_get("track_name")?,
        requested_by: row.try_get("requested_by")?,
        status: RequestStatus::parse(&status)?,
        created_at: decode_timestamp(&created_at)?,
        played_at: decode_optional_timestamp(row.try_get("played_at")?)?,
    })
}

impl Database {
    /// Queues a new `pending` request.
    pub async fn insert_request(
        &self,
        request: &NewSongRequest,
        now: DateTime<Utc>,
    ) -> StoreResult<SongRequest> {
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(
            r#"
            INSERT INTO song_requests (id, zone_id, track_uri, track_name, requested_by,
                                       status, created_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&id)
        .bind(&request.zone_id)
        .bind(&request.track_uri)
        .bind(&request.track_name)
        .bind(&request.requested_by)
        .bind(encode_timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(SongRequest {
            id,
            zone_id: request.zone_id.clone(),
            track_uri: request.track_uri.clone(),
            track_name: request.track_name.clone(),
            requested_by: request.requested_by.clone(),
            status: RequestStatus::Pending,
            created_at: now,
            played_at: None,
        })
    }

    pub async fn get_request(&self, id: &str) -> StoreResult<Option<SongRequest>> {
        let row = sqlx::query("SELECT * FROM song_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    /// Oldest `pending` request of a zone (FIFO).
    pub async fn oldest_pending_request(&self, zone_id: &str) -> StoreResult<Option<SongRequest>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM song_requests
            WHERE zone_id = ? AND status = 'pending'
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(zone_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    /// The zone's `playing` request, if any.
    pub async fn playing_request(&self, zone_id: &str) -> StoreResult<Option<SongRequest>> {
        let row = sqlx::query(
            "SELECT * FROM song_requests WHERE zone_id = ? AND status = 'playing' LIMIT 1",
        )
        .bind(zone_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(request_from_row).transpose()
    }

    /// Number of `pending` plus `playing` requests of a zone.
    pub async fn count_active_requests(&self, zone_id: &str) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM song_requests WHERE zone_id = ? AND status IN ('pending', 'playing')",
        )
        .bind(zone_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Moves a request `pending → playing`.
    ///
    /// Returns `false` if the request is no longer pending or another request
    /// of the same zone is already playing.
    pub async fn claim_request(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE song_requests SET status = 'playing', played_at = ?
            WHERE id = ? AND status = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM song_requests AS other
                  WHERE other.zone_id = song_requests.zone_id AND other.status = 'playing'
              )
            "#,
        )
        .bind(encode_timestamp(now))
        .bind(id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a claimed request to the queue (`playing → pending`).
    pub async fn release_request(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE song_requests SET status = 'pending', played_at = NULL WHERE id = ? AND status = 'playing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Marks a finished request `completed`.
    pub async fn complete_request(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE song_requests SET status = 'completed' WHERE id = ? AND status = 'playing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Marks an unplayable request `failed` so it stops blocking the queue.
    pub async fn fail_request(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE song_requests SET status = 'failed' WHERE id = ? AND status IN ('pending', 'playing')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes a request that has not started playing.
    pub async fn delete_pending_request(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM song_requests WHERE id = ? AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
