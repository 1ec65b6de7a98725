//! Per-zone orchestration state.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::models::{decode_optional_timestamp, decode_timestamp, encode_timestamp};
use super::{Activity, Database, Interruption, PlaybackState, StoreResult};

fn state_from_row(row: &SqliteRow) -> StoreResult<PlaybackState> {
    let activity: String = row.try_get("current_activity")?;
    let schedule_id: Option<String> = row.try_get("interrupted_schedule_id")?;
    let last_updated: String = row.try_get("last_updated")?;

    let track: Option<String> = row.try_get("interrupted_track")?;
    let position_ms: Option<i64> = row.try_get("interrupted_position_ms")?;
    let interruption = decode_optional_timestamp(row.try_get("interrupted_at")?)?.map(|at| {
        Interruption {
            at,
            track,
            position_ms,
        }
    });

    Ok(PlaybackState {
        zone_id: row.try_get("zone_id")?,
        activity: Activity::from_columns(&activity, schedule_id)?,
        interruption,
        last_updated: decode_timestamp(&last_updated)?,
    })
}

impl Database {
    /// Loads a zone's playback state, creating an `idle` row if none exists.
    pub async fn playback_state(&self, zone_id: &str, now: DateTime<Utc>) -> StoreResult<PlaybackState> {
        sqlx::query(
            "INSERT OR IGNORE INTO playback_state (zone_id, current_activity, last_updated) VALUES (?, 'idle', ?)",
        )
        .bind(zone_id)
        .bind(encode_timestamp(now))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM playback_state WHERE zone_id = ?")
            .bind(zone_id)
            .fetch_one(&self.pool)
            .await?;
        state_from_row(&row)
    }

    /// Writes the whole state row.
    pub async fn save_playback_state(&self, state: &PlaybackState) -> StoreResult<()> {
        let interruption = state.interruption.as_ref();
        sqlx::query(
            r#"
            INSERT INTO playback_state (zone_id, current_activity, interrupted_schedule_id,
                                        interrupted_at, interrupted_track,
                                        interrupted_position_ms, last_updated)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(zone_id) DO UPDATE SET
                current_activity = excluded.current_activity,
                interrupted_schedule_id = excluded.interrupted_schedule_id,
                interrupted_at = excluded.interrupted_at,
                interrupted_track = excluded.interrupted_track,
                interrupted_position_ms = excluded.interrupted_position_ms,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&state.zone_id)
        .bind(state.activity.as_str())
        .bind(state.activity.schedule_column())
        .bind(interruption.map(|i| encode_timestamp(i.at)))
        .bind(interruption.and_then(|i| i.track.clone()))
        .bind(interruption.and_then(|i| i.position_ms))
        .bind(encode_timestamp(state.last_updated))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refreshes `last_updated` only. Returns false if the zone has no state row.
    pub async fn touch_playback_state(&self, zone_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE playback_state SET last_updated = ? WHERE zone_id = ?")
            .bind(encode_timestamp(now))
            .bind(zone_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Every stored state row, ordered by zone id.
    pub async fn list_playback_states(&self) -> StoreResult<Vec<PlaybackState>> {
        let rows = sqlx::query("SELECT * FROM playback_state ORDER BY zone_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(state_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::seeded;
    use chrono::Duration;

    #[tokio::test]
    async fn visitor_state_with_interruption_round_trips() {
        let db = seeded().await;
        let now = Utc::now();
        let state = PlaybackState {
            zone_id: "z1".into(),
            activity: Activity::VisitorRequest {
                resume_schedule_id: Some("s1".into()),
            },
            interruption: Some(Interruption {
                at: now,
                track: Some("item-7".into()),
                position_ms: Some(81_000),
            }),
            last_updated: now,
        };
        db.save_playback_state(&state).await.unwrap();

        let loaded = db.playback_state("z1", now).await.unwrap();
        assert_eq!(loaded.activity, state.activity);
        let interruption = loaded.interruption.unwrap();
        assert_eq!(interruption.track.as_deref(), Some("item-7"));
        assert_eq!(interruption.position_ms, Some(81_000));
    }

    #[tokio::test]
    async fn missing_row_is_created_idle() {
        let db = seeded().await;
        sqlx::query("DELETE FROM playback_state")
            .execute(db.pool())
            .await
            .unwrap();

        let state = db.playback_state("z1", Utc::now()).await.unwrap();
        assert_eq!(state.activity, Activity::Idle);
        assert_eq!(db.list_playback_states().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn touch_only_moves_timestamp() {
        let db = seeded().await;
        let before = db.playback_state("z1", Utc::now()).await.unwrap();
        let later = before.last_updated + Duration::minutes(5);

        assert!(db.touch_playback_state("z1", later).await.unwrap());
        assert!(!db.touch_playback_state("missing", later).await.unwrap());

        let after = db.playback_state("z1", later).await.unwrap();
        assert_eq!(after.activity, before.activity);
        assert!(after.last_updated > before.last_updated);
    }
}
