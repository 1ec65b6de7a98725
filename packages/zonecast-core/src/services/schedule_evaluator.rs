//! Decides which recurring schedule, if any, is active for a zone right now.
//!
//! All window math happens in the zone environment's time zone. When enabled
//! windows overlap, the schedule with the earliest `start_time` wins, even if
//! a later-starting one is nested inside it.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::clock::Clock;
use crate::db::{parse_timezone, Database, Schedule, StoreError, StoreResult, ZoneSchedule};

/// Zone-local day of week (0 = Sunday) and time of day for `now`.
pub fn local_day_and_time(now: DateTime<Utc>, tz: Tz) -> (u8, NaiveTime) {
    let local = now.with_timezone(&tz);
    (local.weekday().num_days_from_sunday() as u8, local.time())
}

/// True if `schedule`'s window covers `day` at `time`. Ignores `enabled`.
///
/// The start is inclusive and the end exclusive; a missing end means
/// "until the end of the day".
pub fn window_contains(schedule: &Schedule, day: u8, time: NaiveTime) -> bool {
    schedule.days_of_week.contains(&day)
        && schedule.start_time <= time
        && schedule.end_time.map_or(true, |end| time < end)
}

/// Picks the active schedule among `schedules` (earliest start wins).
pub fn select_active(schedules: &[Schedule], day: u8, time: NaiveTime) -> Option<&Schedule> {
    let mut ordered: Vec<&Schedule> = schedules.iter().filter(|s| s.enabled).collect();
    ordered.sort_by_key(|s| s.start_time);
    ordered
        .into_iter()
        .find(|s| window_contains(s, day, time))
}

/// Why one schedule is or is not active.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleCheck {
    pub schedule_id: String,
    pub name: String,
    pub enabled: bool,
    pub day_matches: bool,
    pub after_start: bool,
    pub before_end: bool,
    /// True for the single schedule `active_schedule` would return.
    pub active: bool,
}

/// Diagnostic breakdown of a zone's schedules at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleExplanation {
    pub zone_id: String,
    pub timezone: String,
    pub local_day: u8,
    pub local_time: NaiveTime,
    pub active_schedule_id: Option<String>,
    pub checks: Vec<ScheduleCheck>,
}

/// Evaluates persisted schedules against the clock. Never writes.
pub struct ScheduleEvaluator {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl ScheduleEvaluator {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// The schedule that should be playing in `zone_id` now, if any.
    pub async fn active_schedule(&self, zone_id: &str) -> StoreResult<Option<Schedule>> {
        let rows = self.db.enabled_schedules_for_zone(zone_id).await?;
        let Some(first) = rows.first() else {
            log::debug!("[Scheduler] Zone {}: no enabled schedules", zone_id);
            return Ok(None);
        };
        let tz = stored_timezone(&first.timezone)?;
        let (day, time) = local_day_and_time(self.clock.now(), tz);

        let schedules: Vec<Schedule> = rows.into_iter().map(|r| r.schedule).collect();
        let active = select_active(&schedules, day, time).cloned();

        match &active {
            Some(s) => log::debug!(
                "[Scheduler] Zone {}: '{}' active (day {}, {})",
                zone_id,
                s.name,
                day,
                time.format("%H:%M:%S")
            ),
            None => log::debug!(
                "[Scheduler] Zone {}: nothing active (day {}, {})",
                zone_id,
                day,
                time.format("%H:%M:%S")
            ),
        }
        Ok(active)
    }

    /// Explains every schedule of `zone_id`, enabled or not.
    pub async fn explain(&self, zone_id: &str) -> StoreResult<ScheduleExplanation> {
        let timezone = {
            let zone = self.db.get_zone(zone_id).await?;
            self.db.get_environment(&zone.environment_id).await?.timezone
        };
        let tz = stored_timezone(&timezone)?;
        let (day, time) = local_day_and_time(self.clock.now(), tz);

        let rows: Vec<ZoneSchedule> = self.db.all_schedules_for_zone(zone_id).await?;
        let schedules: Vec<Schedule> = rows.into_iter().map(|r| r.schedule).collect();
        let active_schedule_id = select_active(&schedules, day, time).map(|s| s.id.clone());

        let checks = schedules
            .iter()
            .map(|s| ScheduleCheck {
                schedule_id: s.id.clone(),
                name: s.name.clone(),
                enabled: s.enabled,
                day_matches: s.days_of_week.contains(&day),
                after_start: s.start_time <= time,
                before_end: s.end_time.map_or(true, |end| time < end),
                active: active_schedule_id.as_deref() == Some(s.id.as_str()),
            })
            .collect();

        Ok(ScheduleExplanation {
            zone_id: zone_id.to_string(),
            timezone,
            local_day: day,
            local_time: time,
            active_schedule_id,
            checks,
        })
    }
}

fn stored_timezone(name: &str) -> StoreResult<Tz> {
    parse_timezone(name).map_err(|_| StoreError::Corrupt(format!("unknown time zone '{name}'")))
}
