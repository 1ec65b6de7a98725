//! Persisted record types.
//!
//! Rows are decoded into these types at the query layer so the services never
//! see raw column encodings (JSON arrays, `HH:MM:SS` strings, RFC 3339 text).

use chrono::{DateTime, Duration, NaiveTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use super::{StoreError, StoreResult};

/// Default validity window of a zone's cached group id (minutes).
pub const DEFAULT_GROUP_CACHE_TTL_MINUTES: i64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Environment / Zone
// ─────────────────────────────────────────────────────────────────────────────

/// A physical installation: one household, one time zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    /// IANA time zone name, e.g. `Europe/Berlin`.
    pub timezone: String,
    pub household_id: String,
}

/// A named playback target defined by its devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub environment_id: String,
    /// Devices that define this zone. Authoritative over `sonos_group_id`.
    pub device_player_ids: Vec<String>,
    /// Last resolved group id. A hint, never trusted without validation.
    pub sonos_group_id: Option<String>,
    pub group_id_cached_at: Option<DateTime<Utc>>,
    pub group_id_cache_ttl_minutes: i64,
}

impl Zone {
    /// Returns true if a cached group id exists and its TTL has not elapsed.
    ///
    /// `fallback_ttl_minutes` applies when the zone's own TTL is not positive.
    #[must_use]
    pub fn cache_is_fresh(&self, now: DateTime<Utc>, fallback_ttl_minutes: i64) -> bool {
        let (Some(_), Some(cached_at)) = (&self.sonos_group_id, self.group_id_cached_at) else {
            return false;
        };
        let ttl = if self.group_id_cache_ttl_minutes > 0 {
            self.group_id_cache_ttl_minutes
        } else {
            fallback_ttl_minutes
        };
        now - cached_at < Duration::minutes(ttl)
    }
}

/// A zone joined with the household that owns its devices.
#[derive(Debug, Clone)]
pub struct ZoneTarget {
    pub zone: Zone,
    pub household_id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Schedule
// ─────────────────────────────────────────────────────────────────────────────

/// A recurring day/time window during which a playlist should play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub id: String,
    pub zone_id: String,
    pub name: String,
    pub playlist_uri: String,
    /// Days the schedule runs, 0 = Sunday.
    pub days_of_week: Vec<u8>,
    pub start_time: NaiveTime,
    /// `None` means "until the end of the day".
    pub end_time: Option<NaiveTime>,
    pub enabled: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Song Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a visitor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Playing,
    Completed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Playing => "playing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "playing" => Ok(Self::Playing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Corrupt(format!("unknown request status '{other}'"))),
        }
    }
}

/// A visitor-submitted track, queued FIFO per zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SongRequest {
    pub id: String,
    pub zone_id: String,
    pub track_uri: String,
    pub track_name: Option<String>,
    pub requested_by: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub played_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback State
// ─────────────────────────────────────────────────────────────────────────────

/// What the orchestrator last made a zone do.
///
/// Stored as `current_activity` plus `interrupted_schedule_id`; the column is
/// read as "running schedule" while scheduled and "schedule to resume" while
/// serving visitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "activity", rename_all = "snake_case")]
pub enum Activity {
    Idle,
    Scheduled { schedule_id: String },
    VisitorRequest { resume_schedule_id: Option<String> },
}

impl Activity {
    /// Column value for `current_activity`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scheduled { .. } => "scheduled",
            Self::VisitorRequest { .. } => "visitor_request",
        }
    }

    /// Column value for `interrupted_schedule_id`.
    pub fn schedule_column(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Scheduled { schedule_id } => Some(schedule_id),
            Self::VisitorRequest { resume_schedule_id } => resume_schedule_id.as_deref(),
        }
    }

    /// Decodes the two stored columns.
    pub fn from_columns(activity: &str, schedule_id: Option<String>) -> StoreResult<Self> {
        match (activity, schedule_id) {
            ("idle", _) => Ok(Self::Idle),
            ("scheduled", Some(schedule_id)) => Ok(Self::Scheduled { schedule_id }),
            ("scheduled", None) => Err(StoreError::Corrupt(
                "scheduled activity without a schedule id".into(),
            )),
            ("visitor_request", resume_schedule_id) => {
                Ok(Self::VisitorRequest { resume_schedule_id })
            }
            (other, _) => Err(StoreError::Corrupt(format!("unknown activity '{other}'"))),
        }
    }

    /// The schedule currently running, if any.
    pub fn running_schedule(&self) -> Option<&str> {
        match self {
            Self::Scheduled { schedule_id } => Some(schedule_id),
            _ => None,
        }
    }
}

/// Snapshot of what was playing when a schedule was interrupted.
///
/// The position is recorded but never restored: resuming reloads the playlist
/// from its start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interruption {
    pub at: DateTime<Utc>,
    pub track: Option<String>,
    pub position_ms: Option<i64>,
}

/// Per-zone orchestration memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackState {
    pub zone_id: String,
    pub activity: Activity,
    pub interruption: Option<Interruption>,
    pub last_updated: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Column codecs
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{s}': {e}")))
}

pub(crate) fn decode_optional_timestamp(s: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    s.as_deref().map(decode_timestamp).transpose()
}

pub(crate) fn encode_time(t: NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

/// Parses `HH:MM:SS` or `HH:MM`.
pub fn parse_time_of_day(s: &str) -> StoreResult<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| StoreError::Invalid(format!("bad time of day '{s}'")))
}

pub(crate) fn decode_string_list(s: &str) -> StoreResult<Vec<String>> {
    serde_json::from_str(s).map_err(|e| StoreError::Corrupt(format!("bad id list '{s}': {e}")))
}

pub(crate) fn decode_days(s: &str) -> StoreResult<Vec<u8>> {
    let days: Vec<u8> =
        serde_json::from_str(s).map_err(|e| StoreError::Corrupt(format!("bad days '{s}': {e}")))?;
    validate_days(&days)?;
    Ok(days)
}

pub(crate) fn validate_days(days: &[u8]) -> StoreResult<()> {
    match days.iter().find(|d| **d > 6) {
        Some(d) => Err(StoreError::Invalid(format!(
            "day of week {d} out of range 0..=6"
        ))),
        None => Ok(()),
    }
}

/// Parses an IANA time zone name.
pub fn parse_timezone(name: &str) -> StoreResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| StoreError::Invalid(format!("unknown time zone '{name}'")))
}
