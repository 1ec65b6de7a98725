//! Schedule records.

use chrono::NaiveTime;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::models::{decode_days, encode_time, parse_time_of_day, validate_days};
use super::{Database, Schedule, StoreError, StoreResult};

/// Input for [`Database::insert_schedule`].
#[derive(Debug, Clone)]
pub struct NewSchedule {
    /// Generated when `None`.
    pub id: Option<String>,
    pub zone_id: String,
    pub name: String,
    pub playlist_uri: String,
    pub days_of_week: Vec<u8>,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub enabled: bool,
}

/// A schedule together with its zone's environment time zone.
#[derive(Debug, Clone)]
pub struct ZoneSchedule {
    pub schedule: Schedule,
    pub timezone: String,
}

fn schedule_from_row(row: &SqliteRow) -> StoreResult<Schedule> {
    let days: String = row.try_get("days_of_week")?;
    let start: String = row.try_get("start_time")?;
    let end: Option<String> = row.try_get("end_time")?;
    let enabled: i64 = row.try_get("enabled")?;

    let decode_time = |s: &str| {
        parse_time_of_day(s).map_err(|_| StoreError::Corrupt(format!("bad time of day '{s}'")))
    };

    Ok(Schedule {
        id: row.try_get("id")?,
        zone_id: row.try_get("zone_id")?,
        name: row.try_get("name")?,
        playlist_uri: row.try_get("playlist_uri")?,
        days_of_week: decode_days(&days)?,
        start_time: decode_time(&start)?,
        end_time: end.as_deref().map(decode_time).transpose()?,
        enabled: enabled != 0,
    })
}

impl Database {
    pub async fn insert_schedule(&self, schedule: &NewSchedule) -> StoreResult<Schedule> {
        validate_days(&schedule.days_of_week)?;
        let id = schedule
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let days = serde_json::to_string(&schedule.days_of_week)
            .map_err(|e| StoreError::Invalid(format!("days of week: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO schedules (id, zone_id, name, playlist_uri, days_of_week,
                                   start_time, end_time, enabled)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&schedule.zone_id)
        .bind(&schedule.name)
        .bind(&schedule.playlist_uri)
        .bind(&days)
        .bind(encode_time(schedule.start_time))
        .bind(schedule.end_time.map(encode_time))
        .bind(schedule.enabled)
        .execute(&self.pool)
        .await?;

        Ok(Schedule {
            id,
            zone_id: schedule.zone_id.clone(),
            name: schedule.name.clone(),
            playlist_uri: schedule.playlist_uri.clone(),
            days_of_week: schedule.days_of_week.clone(),
            start_time: schedule.start_time,
            end_time: schedule.end_time,
            enabled: schedule.enabled,
        })
    }

    pub async fn get_schedule(&self, id: &str) -> StoreResult<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    /// Enabled schedules of a zone with the zone's time zone, earliest start first.
    pub async fn enabled_schedules_for_zone(&self, zone_id: &str) -> StoreResult<Vec<ZoneSchedule>> {
        self.zone_schedules(zone_id, true).await
    }

    /// Every schedule of a zone, enabled or not, earliest start first.
    pub async fn all_schedules_for_zone(&self, zone_id: &str) -> StoreResult<Vec<ZoneSchedule>> {
        self.zone_schedules(zone_id, false).await
    }

    async fn zone_schedules(&self, zone_id: &str, enabled_only: bool) -> StoreResult<Vec<ZoneSchedule>> {
        let rows = sqlx::query(
            r#"
            SELECT s.*, e.timezone AS timezone
            FROM schedules s
            JOIN zones z ON z.id = s.zone_id
            JOIN environments e ON e.id = z.environment_id
            WHERE s.zone_id = ? AND (s.enabled = 1 OR ? = 0)
            ORDER BY s.start_time ASC, s.id ASC
            "#,
        )
        .bind(zone_id)
        .bind(enabled_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<ZoneSchedule> {
                Ok(ZoneSchedule {
                    schedule: schedule_from_row(row)?,
                    timezone: row.try_get("timezone")?,
                })
            })
            .collect()
    }
}
