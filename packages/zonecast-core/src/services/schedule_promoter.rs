//! The slower schedule check: starts schedules whose window has opened and
//! retires ones whose window has closed, without touching the visitor queue.

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{Activity, Database, Zone};
use crate::sonos::SonosClient;

use super::group_resolver::GroupResolver;
use super::queue_processor::{TickResult, ZoneOutcome};
use super::schedule_evaluator::ScheduleEvaluator;
use super::zone_locks::ZoneLocks;

pub struct SchedulePromoter {
    db: Database,
    sonos: Arc<dyn SonosClient>,
    resolver: Arc<GroupResolver>,
    evaluator: Arc<ScheduleEvaluator>,
    clock: Arc<dyn Clock>,
    zone_locks: Arc<ZoneLocks>,
}

impl SchedulePromoter {
    pub fn new(
        db: Database,
        sonos: Arc<dyn SonosClient>,
        resolver: Arc<GroupResolver>,
        evaluator: Arc<ScheduleEvaluator>,
        clock: Arc<dyn Clock>,
        zone_locks: Arc<ZoneLocks>,
    ) -> Self {
        Self {
            db,
            sonos,
            resolver,
            evaluator,
            clock,
            zone_locks,
        }
    }

    /// Reconciles `zone`'s running schedule with the active one.
    ///
    /// Visitor playback is never interrupted. The group is only resolved
    /// when a playlist actually needs loading. Runs under the zone lock
    /// shared with the queue tick.
    pub async fn check_zone(&self, zone: &Zone, household_id: &str) -> TickResult<ZoneOutcome> {
        let _zone_guard = self.zone_locks.lock(&zone.id).await;
        let mut state = self.db.playback_state(&zone.id, self.clock.now()).await?;
        let active = self.evaluator.active_schedule(&zone.id).await?;

        match (state.activity.clone(), active) {
            (Activity::VisitorRequest { .. }, Some(schedule)) => {
                log::info!(
                    "[SchedulePromoter] Zone {}: '{}' due but visitor request in progress",
                    zone.name,
                    schedule.name
                );
                Ok(ZoneOutcome::Untouched)
            }
            (Activity::Scheduled { schedule_id }, Some(schedule)) if schedule_id == schedule.id => {
                log::debug!(
                    "[SchedulePromoter] Zone {}: '{}' already running",
                    zone.name,
                    schedule.name
                );
                Ok(ZoneOutcome::NoChange)
            }
            (_, Some(schedule)) => {
                let group = self.resolver.resolve(zone, household_id).await?;
                self.sonos
                    .load_playlist(&group.group_id, &schedule.playlist_uri, true)
                    .await?;

                state.activity = Activity::Scheduled {
                    schedule_id: schedule.id.clone(),
                };
                state.interruption = None;
                state.last_updated = self.clock.now();
                self.db.save_playback_state(&state).await?;

                log::info!(
                    "[SchedulePromoter] Zone {}: started '{}'",
                    zone.name,
                    schedule.name
                );
                Ok(ZoneOutcome::StartedSchedule)
            }
            (Activity::Scheduled { schedule_id }, None) => {
                if self.db.count_active_requests(&zone.id).await? > 0 {
                    log::info!(
                        "[SchedulePromoter] Zone {}: schedule ended but visitor requests remain",
                        zone.name
                    );
                    return Ok(ZoneOutcome::NoChange);
                }
                state.activity = Activity::Idle;
                state.interruption = None;
                state.last_updated = self.clock.now();
                self.db.save_playback_state(&state).await?;
                log::info!(
                    "[SchedulePromoter] Zone {}: schedule {} ended, now idle",
                    zone.name,
                    schedule_id
                );
                Ok(ZoneOutcome::WentIdle)
            }
            (_, None) => Ok(ZoneOutcome::NoChange),
        }
    }
}
