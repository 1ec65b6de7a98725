//! Zone orchestration: group resolution, schedule evaluation and the ticks
//! that drive playback.

mod group_resolver;
mod queue_processor;
mod schedule_evaluator;
mod schedule_promoter;
mod tick_driver;
mod zone_locks;

pub use group_resolver::{GroupResolution, GroupResolver, ResolutionError, ResolutionResult};
pub use queue_processor::{QueueProcessor, TickError, TickResult, ZoneOutcome};
pub use schedule_evaluator::{
    local_day_and_time, select_active, window_contains, ScheduleCheck, ScheduleEvaluator,
    ScheduleExplanation,
};
pub use schedule_promoter::SchedulePromoter;
pub use tick_driver::{GroupRefreshReport, TickDriver, TickKind, TickSummary, ZoneReport};
pub use zone_locks::ZoneLocks;
