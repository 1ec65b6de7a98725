//! Per-zone reconciliation of visitor requests against scheduled playback.
//!
//! Each tick senses three inputs (the oldest pending request, the playing
//! request, and whether the group is producing audio) and applies the first
//! matching step:
//!
//! 1. Resolve the group; abort the zone on failure.
//! 2. Guard: audio we did not start and no requests means hands off.
//! 3. Promote a pending request, interrupting a schedule if one runs.
//! 4. Advance past a finished request: next request, resume, or fall through.
//! 5. Cold-start the active schedule, or drop to idle once nothing is left.
//!
//! A failed step leaves persisted state as it was so the next tick retries
//! from the same point. The whole step runs under the zone's lock, which the
//! schedule promoter shares, so overlapping ticks see each other's writes.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::db::{Activity, Database, Interruption, PlaybackState, SongRequest, StoreError, Zone};
use crate::sonos::types::PlaybackStatus;
use crate::sonos::{ControlError, SonosClient};

use super::group_resolver::{GroupResolver, ResolutionError};
use super::schedule_evaluator::ScheduleEvaluator;
use super::zone_locks::ZoneLocks;

/// Errors that abort one zone's tick. None of them are fatal to the process.
#[derive(Debug, Error)]
pub enum TickError {
    /// Group could not be resolved.
    #[error("Group resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// Device platform call failed.
    #[error("Device call failed: {0}")]
    Device(#[from] ControlError),

    /// Persisted data missing or unreadable.
    #[error("Data error: {0}")]
    Data(#[from] StoreError),

    /// Zone did not finish within its time budget.
    #[error("Zone processing exceeded {0:?}")]
    TimedOut(Duration),
}

/// Convenient Result alias for per-zone tick operations.
pub type TickResult<T> = Result<T, TickError>;

impl TickError {
    /// Returns true if retrying on the next tick is expected to help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Resolution(ResolutionError::Platform(e)) | Self::Device(e) => e.is_transient(),
            Self::Resolution(ResolutionError::NoDevicesOnline(_)) | Self::TimedOut(_) => true,
            _ => false,
        }
    }
}

/// What one tick did to a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneOutcome {
    /// Group was playing something outside our responsibility.
    Untouched,
    /// A pending request started playing.
    StartedRequest,
    /// A finished request was followed by the next one.
    AdvancedQueue,
    /// The interrupted schedule was reloaded.
    ResumedSchedule,
    /// The active schedule was started.
    StartedSchedule,
    /// The zone dropped back to idle.
    WentIdle,
    /// Nothing needed doing.
    NoChange,
}

/// Puts a claimed request back in the queue if the tick is dropped (for
/// example by the zone timeout) or fails before the new activity is saved.
struct ClaimGuard {
    db: Database,
    request_id: Option<String>,
}

impl ClaimGuard {
    fn new(db: &Database, request_id: &str) -> Self {
        Self {
            db: db.clone(),
            request_id: Some(request_id.to_string()),
        }
    }

    fn disarm(&mut self) {
        self.request_id = None;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let Some(id) = self.request_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("[Queue] Request {} left claimed: no runtime to release it", id);
            return;
        };
        log::warn!("[Queue] Request {} not started, releasing claim", id);
        let db = self.db.clone();
        handle.spawn(async move {
            if let Err(e) = db.release_request(&id).await {
                log::warn!("[Queue] Could not release request {}: {}", id, e);
            }
        });
    }
}

/// The queue state machine, invoked once per zone per tick.
pub struct QueueProcessor {
    db: Database,
    sonos: Arc<dyn SonosClient>,
    resolver: Arc<GroupResolver>,
    evaluator: Arc<ScheduleEvaluator>,
    clock: Arc<dyn Clock>,
    zone_locks: Arc<ZoneLocks>,
    pause_settle: Duration,
}

impl QueueProcessor {
    pub fn new(
        db: Database,
        sonos: Arc<dyn SonosClient>,
        resolver: Arc<GroupResolver>,
        evaluator: Arc<ScheduleEvaluator>,
        clock: Arc<dyn Clock>,
        zone_locks: Arc<ZoneLocks>,
        pause_settle: Duration,
    ) -> Self {
        Self {
            db,
            sonos,
            resolver,
            evaluator,
            clock,
            zone_locks,
            pause_settle,
        }
    }

    /// Runs one reconciliation step for `zone`.
    pub async fn process_zone(&self, zone: &Zone, household_id: &str) -> TickResult<ZoneOutcome> {
        let _zone_guard = self.zone_locks.lock(&zone.id).await;

        let group = self.resolver.resolve(zone, household_id).await?;
        let group_id = group.group_id.as_str();

        let pending = self.db.oldest_pending_request(&zone.id).await?;
        let playing = self.db.playing_request(&zone.id).await?;
        let status = self.sonos.get_playback_status(group_id).await?;
        let device_playing = status.is_playing();

        if device_playing && pending.is_none() && playing.is_none() {
            log::debug!(
                "[Queue] Zone {}: group busy with content we did not start, leaving it",
                zone.name
            );
            return Ok(ZoneOutcome::Untouched);
        }

        let state = self.db.playback_state(&zone.id, self.clock.now()).await?;

        match (pending, playing) {
            (Some(next), None) => {
                self.start_request(zone, group_id, &next, &status, state, ZoneOutcome::StartedRequest)
                    .await
            }
            (_, Some(current)) if device_playing => {
                log::debug!(
                    "[Queue] Zone {}: request {} still playing",
                    zone.name,
                    current.id
                );
                Ok(ZoneOutcome::NoChange)
            }
            (next, Some(current)) => {
                self.advance(zone, group_id, &current, next, &status, state)
                    .await
            }
            (None, None) => self.settle(zone, group_id, state).await,
        }
    }

    /// Claims `request`, pauses what is playing, and loads the track.
    async fn start_request(
        &self,
        zone: &Zone,
        group_id: &str,
        request: &SongRequest,
        status: &PlaybackStatus,
        mut state: PlaybackState,
        outcome: ZoneOutcome,
    ) -> TickResult<ZoneOutcome> {
        let now = self.clock.now();
        if !self.db.claim_request(&request.id, now).await? {
            log::info!(
                "[Queue] Zone {}: request {} already claimed elsewhere",
                zone.name,
                request.id
            );
            return Ok(ZoneOutcome::NoChange);
        }
        let mut claim = ClaimGuard::new(&self.db, &request.id);

        let (activity, interruption) = match &state.activity {
            Activity::Scheduled { schedule_id } => {
                log::info!(
                    "[Queue] Zone {}: interrupting schedule {} for visitor request",
                    zone.name,
                    schedule_id
                );
                (
                    Activity::VisitorRequest {
                        resume_schedule_id: Some(schedule_id.clone()),
                    },
                    Some(Interruption {
                        at: now,
                        track: status.item_id.clone(),
                        position_ms: status.position_millis,
                    }),
                )
            }
            Activity::Idle => (
                Activity::VisitorRequest {
                    resume_schedule_id: None,
                },
                None,
            ),
            Activity::VisitorRequest { .. } => (state.activity.clone(), state.interruption.clone()),
        };

        let paused = status.is_playing();
        if paused {
            if let Err(e) = self.sonos.pause(group_id).await {
                // Never load over content that is still playing.
                claim.disarm();
                log::warn!(
                    "[Queue] Zone {}: pause failed, request {} stays queued: {}",
                    zone.name,
                    request.id,
                    e
                );
                self.db.release_request(&request.id).await?;
                return Err(e.into());
            }
            tokio::time::sleep(self.pause_settle).await;
        }

        if let Err(e) = self.sonos.load_track(group_id, &request.track_uri, true).await {
            claim.disarm();
            self.abandon_request(zone, request, &e).await?;
            if paused {
                if let Err(play_err) = self.sonos.play(group_id).await {
                    log::warn!(
                        "[Queue] Zone {}: could not resume paused content: {}",
                        zone.name,
                        play_err
                    );
                }
            }
            return Err(e.into());
        }

        // The claim stays armed until the new activity is saved.
        state.activity = activity;
        state.interruption = interruption;
        state.last_updated = self.clock.now();
        self.db.save_playback_state(&state).await?;
        claim.disarm();

        log::info!(
            "[Queue] Zone {}: started request {} ({})",
            zone.name,
            request.id,
            request.track_name.as_deref().unwrap_or(&request.track_uri)
        );
        Ok(outcome)
    }

    /// Undoes a claim after the device rejected the track.
    ///
    /// Transient failures go back to the queue; anything else marks the
    /// request failed so an unplayable track cannot block the zone.
    async fn abandon_request(
        &self,
        zone: &Zone,
        request: &SongRequest,
        err: &ControlError,
    ) -> TickResult<()> {
        if err.is_transient() {
            log::warn!(
                "[Queue] Zone {}: load of request {} failed, will retry: {}",
                zone.name,
                request.id,
                err
            );
            self.db.release_request(&request.id).await?;
        } else {
            log::warn!(
                "[Queue] Zone {}: request {} cannot be played, marking failed: {}",
                zone.name,
                request.id,
                err
            );
            self.db.fail_request(&request.id).await?;
        }
        Ok(())
    }

    /// Completes the finished request and decides what plays next.
    async fn advance(
        &self,
        zone: &Zone,
        group_id: &str,
        finished: &SongRequest,
        next: Option<SongRequest>,
        status: &PlaybackStatus,
        state: PlaybackState,
    ) -> TickResult<ZoneOutcome> {
        if !self.db.complete_request(&finished.id).await? {
            log::info!(
                "[Queue] Zone {}: request {} already completed elsewhere",
                zone.name,
                finished.id
            );
            return Ok(ZoneOutcome::NoChange);
        }
        log::info!(
            "[Queue] Zone {}: request {} finished",
            zone.name,
            finished.id
        );

        if let Some(next) = next {
            return self
                .start_request(zone, group_id, &next, status, state, ZoneOutcome::AdvancedQueue)
                .await;
        }

        let resume = match &state.activity {
            Activity::VisitorRequest {
                resume_schedule_id: Some(id),
            } => Some(id.clone()),
            _ => None,
        };
        if let Some(resume_id) = resume {
            match self.evaluator.active_schedule(&zone.id).await? {
                Some(schedule) if schedule.id == resume_id => {
                    return self
                        .start_schedule(zone, group_id, state, &schedule.id, &schedule.playlist_uri)
                        .await
                        .map(|_| ZoneOutcome::ResumedSchedule);
                }
                _ => log::info!(
                    "[Queue] Zone {}: interrupted schedule {} no longer active",
                    zone.name,
                    resume_id
                ),
            }
        }

        self.settle(zone, group_id, state).await
    }

    /// No requests left and nothing of ours is playing.
    async fn settle(&self, zone: &Zone, group_id: &str, mut state: PlaybackState) -> TickResult<ZoneOutcome> {
        let active = self.evaluator.active_schedule(&zone.id).await?;

        match (state.activity.clone(), active) {
            (Activity::Scheduled { .. }, Some(_)) => Ok(ZoneOutcome::NoChange),
            (Activity::Scheduled { schedule_id }, None) => {
                if self.db.count_active_requests(&zone.id).await? > 0 {
                    return Ok(ZoneOutcome::NoChange);
                }
                log::info!(
                    "[Queue] Zone {}: schedule {} ended, going idle",
                    zone.name,
                    schedule_id
                );
                state.activity = Activity::Idle;
                state.interruption = None;
                state.last_updated = self.clock.now();
                self.db.save_playback_state(&state).await?;
                Ok(ZoneOutcome::WentIdle)
            }
            (_, Some(schedule)) => {
                self.start_schedule(zone, group_id, state, &schedule.id, &schedule.playlist_uri)
                    .await?;
                Ok(ZoneOutcome::StartedSchedule)
            }
            (Activity::Idle, None) => Ok(ZoneOutcome::NoChange),
            (Activity::VisitorRequest { .. }, None) => {
                log::info!(
                    "[Queue] Zone {}: visitor queue drained, going idle",
                    zone.name
                );
                state.activity = Activity::Idle;
                state.interruption = None;
                state.last_updated = self.clock.now();
                self.db.save_playback_state(&state).await?;
                Ok(ZoneOutcome::WentIdle)
            }
        }
    }

    /// Loads a schedule's playlist and records it as running.
    async fn start_schedule(
        &self,
        zone: &Zone,
        group_id: &str,
        mut state: PlaybackState,
        schedule_id: &str,
        playlist_uri: &str,
    ) -> TickResult<()> {
        self.sonos.load_playlist(group_id, playlist_uri, true).await?;

        state.activity = Activity::Scheduled {
            schedule_id: schedule_id.to_string(),
        };
        state.interruption = None;
        state.last_updated = self.clock.now();
        self.db.save_playback_state(&state).await?;

        log::info!(
            "[Queue] Zone {}: schedule {} playing",
            zone.name,
            schedule_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_support::seeded;
    use crate::db::{NewSchedule, NewSongRequest, RequestStatus};
    use crate::sonos::test_fixtures::{group, Call, MockSonos};
    use crate::sonos::types::PlaybackState as DeviceState;
    use chrono::{NaiveTime, TimeZone, Utc};

    const GROUP: &str = "RINCON_A:1";

    struct Harness {
        db: Database,
        sonos: Arc<MockSonos>,
        clock: Arc<FixedClock>,
        processor: QueueProcessor,
    }

    /// Zone `z1` already grouped as `GROUP`. Clock: Monday 2026-01-05 10:00 UTC.
    async fn harness() -> Harness {
        let db = seeded().await;
        let sonos = Arc::new(MockSonos::new(vec![group(GROUP, &["RINCON_A", "RINCON_B"])]));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
        ));
        let resolver = Arc::new(GroupResolver::new(db.clone(), sonos.clone(), clock.clone(), 30));
        let evaluator = Arc::new(ScheduleEvaluator::new(db.clone(), clock.clone()));
        let processor = QueueProcessor::new(
            db.clone(),
            sonos.clone(),
            resolver,
            evaluator,
            clock.clone(),
            ZoneLocks::arc(),
            Duration::ZERO,
        );
        Harness {
            db,
            sonos,
            clock,
            processor,
        }
    }

    impl Harness {
        async fn tick(&self) -> TickResult<ZoneOutcome> {
            let zone = self.db.get_zone("z1").await.unwrap();
            self.processor.process_zone(&zone, "HH").await
        }

        async fn state(&self) -> PlaybackState {
            self.db.playback_state("z1", self.clock.now()).await.unwrap()
        }

        async fn set_activity(&self, activity: Activity) {
            let mut state = self.state().await;
            state.activity = activity;
            self.db.save_playback_state(&state).await.unwrap();
        }

        async fn add_schedule(&self, id: &str, start: u32, end: u32) {
            self.db
                .insert_schedule(&NewSchedule {
                    id: Some(id.into()),
                    zone_id: "z1".into(),
                    name: id.into(),
                    playlist_uri: format!("spotify:playlist:{id}"),
                    days_of_week: vec![0, 1, 2, 3, 4, 5, 6],
                    start_time: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
                    end_time: Some(NaiveTime::from_hms_opt(end, 0, 0).unwrap()),
                    enabled: true,
                })
                .await
                .unwrap();
        }

        async fn add_request(&self, id: &str) {
            self.db
                .insert_request(
                    &NewSongRequest {
                        id: Some(id.into()),
                        zone_id: "z1".into(),
                        track_uri: format!("spotify:track:{id}"),
                        track_name: Some(format!("Track {id}")),
                        requested_by: None,
                    },
                    self.clock.now(),
                )
                .await
                .unwrap();
            self.clock.advance(chrono::Duration::seconds(1));
        }

        async fn status_of(&self, id: &str) -> RequestStatus {
            self.db.get_request(id).await.unwrap().unwrap().status
        }

        fn count_loads(&self) -> (usize, usize) {
            let calls = self.sonos.calls();
            let tracks = calls.iter().filter(|c| matches!(c, Call::LoadTrack(..))).count();
            let playlists = calls
                .iter()
                .filter(|c| matches!(c, Call::LoadPlaylist(..)))
                .count();
            (tracks, playlists)
        }

        async fn overlapping_ticks(&self) -> Vec<ZoneOutcome> {
            let (a, b) = tokio::join!(self.tick(), self.tick());
            let mut outcomes = vec![a.unwrap(), b.unwrap()];
            outcomes.sort_by_key(|o| format!("{o:?}"));
            outcomes
        }
    }

    #[tokio::test]
    async fn guard_leaves_foreign_playback_alone() {
        let h = harness().await;
        h.sonos.set_status(DeviceState::Playing, Some("someone-else"));
        let before = h.state().await;

        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::Untouched);
        assert!(h.sonos.mutating_calls().is_empty());
        assert_eq!(h.state().await, before);
    }

    #[tokio::test]
    async fn request_interrupts_schedule_and_remembers_it() {
        let h = harness().await;
        h.add_schedule("s1", 9, 17).await;
        h.set_activity(Activity::Scheduled {
            schedule_id: "s1".into(),
        })
        .await;
        h.sonos.set_status(DeviceState::Playing, Some("playlist-item-3"));
        h.add_request("r1").await;

        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::StartedRequest);

        assert_eq!(
            h.sonos.mutating_calls(),
            vec![
                Call::Pause(GROUP.into()),
                Call::LoadTrack(GROUP.into(), "spotify:track:r1".into()),
            ]
        );
        let state = h.state().await;
        assert_eq!(
            state.activity,
            Activity::VisitorRequest {
                resume_schedule_id: Some("s1".into())
            }
        );
        let interruption = state.interruption.unwrap();
        assert_eq!(interruption.track.as_deref(), Some("playlist-item-3"));
        assert_eq!(interruption.position_ms, Some(42_000));
        assert_eq!(h.status_of("r1").await, RequestStatus::Playing);
    }

    #[tokio::test]
    async fn request_from_idle_has_nothing_to_resume() {
        let h = harness().await;
        h.add_request("r1").await;

        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::StartedRequest);
        // Idle group is not paused first.
        assert_eq!(
            h.sonos.mutating_calls(),
            vec![Call::LoadTrack(GROUP.into(), "spotify:track:r1".into())]
        );
        assert_eq!(
            h.state().await.activity,
            Activity::VisitorRequest {
                resume_schedule_id: None
            }
        );
    }

    #[tokio::test]
    async fn playing_request_is_left_alone() {
        let h = harness().await;
        h.add_request("r1").await;
        h.add_request("r2").await;
        h.tick().await.unwrap();
        h.sonos.clear_calls();

        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::NoChange);
        assert!(h.sonos.mutating_calls().is_empty());
        assert_eq!(h.status_of("r2").await, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn finished_request_advances_to_next() {
        let h = harness().await;
        h.add_request("r1").await;
        h.add_request("r2").await;
        h.tick().await.unwrap();

        h.sonos.set_status(DeviceState::Idle, None);
        h.sonos.clear_calls();
        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::AdvancedQueue);

        assert_eq!(h.status_of("r1").await, RequestStatus::Completed);
        assert_eq!(h.status_of("r2").await, RequestStatus::Playing);
        assert_eq!(
            h.sonos.mutating_calls(),
            vec![Call::LoadTrack(GROUP.into(), "spotify:track:r2".into())]
        );
    }

    #[tokio::test]
    async fn drained_queue_resumes_interrupted_schedule() {
        let h = harness().await;
        h.add_schedule("s1", 9, 17).await;
        h.set_activity(Activity::Scheduled {
            schedule_id: "s1".into(),
        })
        .await;
        h.sonos.set_status(DeviceState::Playing, Some("item"));
        h.add_request("r1").await;
        h.tick().await.unwrap();

        h.sonos.set_status(DeviceState::Paused, None);
        h.sonos.clear_calls();
        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::ResumedSchedule);

        let state = h.state().await;
        assert_eq!(
            state.activity,
            Activity::Scheduled {
                schedule_id: "s1".into()
            }
        );
        assert!(state.interruption.is_none());
        assert_eq!(
            h.sonos.mutating_calls(),
            vec![Call::LoadPlaylist(GROUP.into(), "spotify:playlist:s1".into())]
        );
        assert_eq!(h.status_of("r1").await, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn ended_schedule_is_not_resumed_but_another_starts() {
        let h = harness().await;
        h.add_schedule("s1", 9, 10).await;
        h.add_schedule("s2", 10, 12).await;
        h.set_activity(Activity::Scheduled {
            schedule_id: "s1".into(),
        })
        .await;
        h.clock.set(Utc.with_ymd_and_hms(2026, 1, 5, 9, 50, 0).unwrap());
        h.sonos.set_status(DeviceState::Playing, Some("item"));
        h.add_request("r1").await;
        h.tick().await.unwrap();

        // The request outlives s1's window.
        h.clock.set(Utc.with_ymd_and_hms(2026, 1, 5, 10, 5, 0).unwrap());
        h.sonos.set_status(DeviceState::Idle, None);
        h.sonos.clear_calls();
        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::StartedSchedule);
        assert_eq!(
            h.state().await.activity,
            Activity::Scheduled {
                schedule_id: "s2".into()
            }
        );
    }

    #[tokio::test]
    async fn drained_queue_without_schedule_goes_idle() {
        let h = harness().await;
        h.add_request("r1").await;
        h.tick().await.unwrap();

        h.sonos.set_status(DeviceState::Idle, None);
        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::WentIdle);
        assert_eq!(h.state().await.activity, Activity::Idle);
    }

    #[tokio::test]
    async fn idle_zone_cold_starts_active_schedule() {
        let h = harness().await;
        h.add_schedule("s1", 9, 17).await;

        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::StartedSchedule);
        assert_eq!(
            h.state().await.activity,
            Activity::Scheduled {
                schedule_id: "s1".into()
            }
        );

        // Playlist ran out: the same schedule is not reloaded.
        h.sonos.set_status(DeviceState::Idle, None);
        h.sonos.clear_calls();
        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::NoChange);
        assert!(h.sonos.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn scheduled_zone_goes_idle_after_window() {
        let h = harness().await;
        h.add_schedule("s1", 8, 9).await;
        h.set_activity(Activity::Scheduled {
            schedule_id: "s1".into(),
        })
        .await;

        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::WentIdle);
        assert_eq!(h.state().await.activity, Activity::Idle);
    }

    #[tokio::test]
    async fn transient_load_failure_releases_claim() {
        let h = harness().await;
        h.add_request("r1").await;
        *h.sonos.fail_load_track.lock() = Some(503);

        let err = h.tick().await.unwrap_err();
        assert!(matches!(err, TickError::Device(_)));
        assert!(err.is_transient());
        assert_eq!(h.status_of("r1").await, RequestStatus::Pending);
        assert_eq!(h.state().await.activity, Activity::Idle);
    }

    #[tokio::test]
    async fn rejected_track_is_failed_and_schedule_resumed() {
        let h = harness().await;
        h.set_activity(Activity::Scheduled {
            schedule_id: "s1".into(),
        })
        .await;
        h.sonos.set_status(DeviceState::Playing, Some("item"));
        h.add_request("r1").await;
        *h.sonos.fail_load_track.lock() = Some(404);

        assert!(h.tick().await.is_err());
        assert_eq!(h.status_of("r1").await, RequestStatus::Failed);
        assert_eq!(h.sonos.mutating_calls().last(), Some(&Call::Play(GROUP.into())));
        assert_eq!(
            h.state().await.activity,
            Activity::Scheduled {
                schedule_id: "s1".into()
            }
        );
    }

    #[tokio::test]
    async fn status_failure_aborts_without_mutation() {
        let h = harness().await;
        h.add_request("r1").await;
        *h.sonos.fail_status.lock() = Some(500);

        assert!(matches!(h.tick().await, Err(TickError::Device(_))));
        assert_eq!(h.status_of("r1").await, RequestStatus::Pending);
        assert!(h.sonos.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn resolution_failure_aborts_zone() {
        let h = harness().await;
        h.sonos.groups.lock().clear();
        h.add_request("r1").await;

        assert!(matches!(h.tick().await, Err(TickError::Resolution(_))));
        assert_eq!(h.status_of("r1").await, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn overlapping_ticks_never_double_promote() {
        let h = harness().await;
        h.add_request("r1").await;
        h.add_request("r2").await;

        let (a, b) = tokio::join!(h.tick(), h.tick());
        a.unwrap();
        b.unwrap();

        let playing: Vec<_> = [h.status_of("r1").await, h.status_of("r2").await]
            .into_iter()
            .filter(|s| *s == RequestStatus::Playing)
            .collect();
        assert_eq!(playing.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_resume_loads_playlist_once() {
        let h = harness().await;
        h.add_schedule("s1", 9, 17).await;
        h.set_activity(Activity::Scheduled {
            schedule_id: "s1".into(),
        })
        .await;
        h.sonos.set_status(DeviceState::Playing, Some("item"));
        h.add_request("r1").await;
        h.tick().await.unwrap();

        h.sonos.set_status(DeviceState::Idle, None);
        h.sonos.clear_calls();
        let outcomes = h.overlapping_ticks().await;

        assert_eq!(outcomes, vec![ZoneOutcome::ResumedSchedule, ZoneOutcome::Untouched]);
        assert_eq!(h.count_loads(), (0, 1));
        assert_eq!(h.status_of("r1").await, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn overlapping_advance_loads_next_track_once() {
        let h = harness().await;
        h.add_request("r1").await;
        h.add_request("r2").await;
        h.add_request("r3").await;
        h.tick().await.unwrap();

        h.sonos.set_status(DeviceState::Idle, None);
        h.sonos.clear_calls();
        let outcomes = h.overlapping_ticks().await;

        assert_eq!(outcomes, vec![ZoneOutcome::AdvancedQueue, ZoneOutcome::NoChange]);
        assert_eq!(h.count_loads(), (1, 0));
        assert_eq!(h.status_of("r1").await, RequestStatus::Completed);
        assert_eq!(h.status_of("r2").await, RequestStatus::Playing);
        assert_eq!(h.status_of("r3").await, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn overlapping_cold_start_loads_playlist_once() {
        let h = harness().await;
        h.add_schedule("s1", 9, 17).await;

        let outcomes = h.overlapping_ticks().await;

        assert_eq!(outcomes, vec![ZoneOutcome::StartedSchedule, ZoneOutcome::Untouched]);
        assert_eq!(h.count_loads(), (0, 1));
    }

    #[tokio::test]
    async fn pause_failure_keeps_request_queued() {
        let h = harness().await;
        h.set_activity(Activity::Scheduled {
            schedule_id: "s1".into(),
        })
        .await;
        h.sonos.set_status(DeviceState::Playing, Some("item"));
        h.add_request("r1").await;
        *h.sonos.fail_pause.lock() = Some(503);

        let err = h.tick().await.unwrap_err();
        assert!(matches!(err, TickError::Device(_)));
        assert!(err.is_transient());
        assert_eq!(h.count_loads(), (0, 0));
        assert_eq!(h.status_of("r1").await, RequestStatus::Pending);
        assert_eq!(
            h.state().await.activity,
            Activity::Scheduled {
                schedule_id: "s1".into()
            }
        );

        // Next tick, with the device answering again, starts it normally.
        *h.sonos.fail_pause.lock() = None;
        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::StartedRequest);
    }

    #[tokio::test]
    async fn failed_state_write_requeues_request_and_keeps_resume_target() {
        let h = harness().await;
        h.add_schedule("s1", 9, 17).await;
        h.set_activity(Activity::Scheduled {
            schedule_id: "s1".into(),
        })
        .await;
        h.sonos.set_status(DeviceState::Playing, Some("item"));
        h.add_request("r1").await;
        sqlx::query(
            "CREATE TRIGGER reject_state_write BEFORE UPDATE ON playback_state \
             BEGIN SELECT RAISE(ABORT, 'state write rejected'); END",
        )
        .execute(h.db.pool())
        .await
        .unwrap();

        assert!(matches!(h.tick().await, Err(TickError::Data(_))));
        assert_eq!(h.count_loads(), (1, 0));

        // The claim is released from a spawned task.
        for _ in 0..50 {
            if h.status_of("r1").await == RequestStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.status_of("r1").await, RequestStatus::Pending);

        sqlx::query("DROP TRIGGER reject_state_write")
            .execute(h.db.pool())
            .await
            .unwrap();
        assert_eq!(h.tick().await.unwrap(), ZoneOutcome::StartedRequest);
        assert_eq!(
            h.state().await.activity,
            Activity::VisitorRequest {
                resume_schedule_id: Some("s1".into())
            }
        );
    }
}
