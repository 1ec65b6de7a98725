//! Runs the queue and schedule ticks across every zone.
//!
//! Zones are grouped by household. Households may run concurrently (bounded
//! by `household_concurrency`), but zones of one household always run one
//! after another so two zones never issue overlapping group changes against
//! the same household. Each zone is bounded by `zone_timeout`; a failure or
//! timeout is logged and counted, and the loop moves on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::{Database, StoreResult, Zone};

use super::group_resolver::{GroupResolution, GroupResolver};
use super::queue_processor::{QueueProcessor, TickError, TickResult, ZoneOutcome};
use super::schedule_promoter::SchedulePromoter;

/// Which per-zone operation a tick runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    Queue,
    Schedules,
}

impl TickKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Schedules => "schedule check",
        }
    }
}

/// Result for one zone within a tick.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneReport {
    pub zone_id: String,
    pub zone_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ZoneOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    timed_out: bool,
}

/// Totals for one tick over all zones.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub zones: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub reports: Vec<ZoneReport>,
}

impl TickSummary {
    fn from_reports(mut reports: Vec<ZoneReport>) -> Self {
        reports.sort_by(|a, b| a.zone_name.cmp(&b.zone_name).then(a.zone_id.cmp(&b.zone_id)));
        let timed_out = reports.iter().filter(|r| r.timed_out).count();
        let failed = reports.iter().filter(|r| r.error.is_some()).count() - timed_out;
        Self {
            zones: reports.len(),
            succeeded: reports.len() - failed - timed_out,
            failed,
            timed_out,
            reports,
        }
    }
}

/// Result of refreshing one zone's group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupRefreshReport {
    pub zone_id: String,
    pub zone_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<GroupResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct TickDriver {
    db: Database,
    processor: Arc<QueueProcessor>,
    promoter: Arc<SchedulePromoter>,
    resolver: Arc<GroupResolver>,
    zone_timeout: Duration,
    household_concurrency: usize,
}

impl TickDriver {
    pub fn new(
        db: Database,
        processor: Arc<QueueProcessor>,
        promoter: Arc<SchedulePromoter>,
        resolver: Arc<GroupResolver>,
        zone_timeout: Duration,
        household_concurrency: usize,
    ) -> Self {
        Self {
            db,
            processor,
            promoter,
            resolver,
            zone_timeout,
            household_concurrency: household_concurrency.max(1),
        }
    }

    /// One queue tick over all zones.
    pub async fn process_all_zones(&self) -> StoreResult<TickSummary> {
        self.run(TickKind::Queue).await
    }

    /// One schedule promotion tick over all zones.
    pub async fn promote_schedules(&self) -> StoreResult<TickSummary> {
        self.run(TickKind::Schedules).await
    }

    /// Runs `kind` over every zone.
    ///
    /// Only a failure to list zones is returned as an error.
    pub async fn run(&self, kind: TickKind) -> StoreResult<TickSummary> {
        let (households, mut reports) = self.partition().await?;
        log::debug!(
            "[Tick] Starting {} tick over {} household(s)",
            kind.label(),
            households.len()
        );

        let per_household: Vec<Vec<ZoneReport>> = stream::iter(households)
            .map(|(household, zones)| self.run_household(kind, household, zones))
            .buffer_unordered(self.household_concurrency)
            .collect()
            .await;
        reports.extend(per_household.into_iter().flatten());

        let summary = TickSummary::from_reports(reports);
        log::info!(
            "[Tick] {} tick: {} zone(s), {} ok, {} failed, {} timed out",
            kind.label(),
            summary.zones,
            summary.succeeded,
            summary.failed,
            summary.timed_out
        );
        Ok(summary)
    }

    /// Re-resolves every zone's group, bypassing cached ids.
    pub async fn refresh_groups(&self) -> StoreResult<Vec<GroupRefreshReport>> {
        let (households, mut reports) = self.partition().await?;
        let mut results: Vec<GroupRefreshReport> = reports
            .drain(..)
            .map(|r| GroupRefreshReport {
                zone_id: r.zone_id,
                zone_name: r.zone_name,
                resolution: None,
                error: r.error,
            })
            .collect();

        for (household, zones) in households {
            for zone in zones {
                let result =
                    match tokio::time::timeout(self.zone_timeout, self.resolver.refresh(&zone, &household)).await {
                        Ok(Ok(resolution)) => Ok(resolution),
                        Ok(Err(e)) => Err(TickError::from(e)),
                        Err(_) => Err(TickError::TimedOut(self.zone_timeout)),
                    };
                match result {
                    Ok(resolution) => results.push(GroupRefreshReport {
                        zone_id: zone.id,
                        zone_name: zone.name,
                        resolution: Some(resolution),
                        error: None,
                    }),
                    Err(e) => {
                        log::warn!("[Tick] Group refresh failed for zone {}: {}", zone.name, e);
                        results.push(GroupRefreshReport {
                            zone_id: zone.id,
                            zone_name: zone.name,
                            resolution: None,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
        }
        Ok(results)
    }

    /// Spawns the periodic queue and schedule loops. They stop when `cancel` fires.
    ///
    /// The loops run independently; a zone visited by both at once is
    /// serialized by the processor and promoter's shared zone lock.
    pub fn spawn_loops(
        self: &Arc<Self>,
        tick_interval: Duration,
        schedule_interval: Duration,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(self).run_loop(TickKind::Queue, tick_interval, cancel.clone())),
            tokio::spawn(Arc::clone(self).run_loop(TickKind::Schedules, schedule_interval, cancel)),
        ]
    }

    async fn run_loop(self: Arc<Self>, kind: TickKind, period: Duration, cancel: CancellationToken) {
        log::info!("[Tick] {} loop every {:?}", kind.label(), period);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[Tick] {} loop stopped", kind.label());
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run(kind).await {
                        log::error!("[Tick] {} tick could not list zones: {}", kind.label(), e);
                    }
                }
            }
        }
    }

    /// Groups zones by household. Zones without one become failed reports.
    async fn partition(&self) -> StoreResult<(BTreeMap<String, Vec<Zone>>, Vec<ZoneReport>)> {
        let mut households: BTreeMap<String, Vec<Zone>> = BTreeMap::new();
        let mut orphans = Vec::new();

        for (zone, household) in self.db.list_zones_with_household().await? {
            match household {
                Some(household) => households.entry(household).or_default().push(zone),
                None => {
                    log::warn!(
                        "[Tick] Zone {} has no environment {}, skipping",
                        zone.name,
                        zone.environment_id
                    );
                    orphans.push(ZoneReport {
                        error: Some(format!("Data error: environment {} missing", zone.environment_id)),
                        zone_id: zone.id,
                        zone_name: zone.name,
                        outcome: None,
                        timed_out: false,
                    });
                }
            }
        }
        Ok((households, orphans))
    }

    async fn run_household(&self, kind: TickKind, household: String, zones: Vec<Zone>) -> Vec<ZoneReport> {
        let mut reports = Vec::with_capacity(zones.len());
        for zone in zones {
            let result = match tokio::time::timeout(self.zone_timeout, self.run_zone(kind, &zone, &household)).await {
                Ok(result) => result,
                Err(_) => Err(TickError::TimedOut(self.zone_timeout)),
            };

            let report = match result {
                Ok(outcome) => ZoneReport {
                    zone_id: zone.id,
                    zone_name: zone.name,
                    outcome: Some(outcome),
                    error: None,
                    timed_out: false,
                },
                Err(e) => {
                    log::warn!(
                        "[Tick] Zone {} {} failed{}: {}",
                        zone.name,
                        kind.label(),
                        if e.is_transient() { " (will retry)" } else { "" },
                        e
                    );
                    ZoneReport {
                        timed_out: matches!(e, TickError::TimedOut(_)),
                        error: Some(e.to_string()),
                        zone_id: zone.id,
                        zone_name: zone.name,
                        outcome: None,
                    }
                }
            };
            reports.push(report);
        }
        reports
    }

    async fn run_zone(&self, kind: TickKind, zone: &Zone, household: &str) -> TickResult<ZoneOutcome> {
        match kind {
            TickKind::Queue => self.processor.process_zone(zone, household).await,
            TickKind::Schedules => self.promoter.check_zone(zone, household).await,
        }
    }
}
