//! Zonecast Core - schedule and visitor-queue orchestration for Sonos zones.
//!
//! A zone is a named set of Sonos players inside one household. Each zone
//! plays its recurring schedule (a playlist inside a weekly time window)
//! unless visitors have queued songs, in which case the schedule is paused,
//! the visitor tracks play in order, and the schedule resumes afterwards.
//!
//! # Architecture
//!
//! - [`db`]: SQLite persistence for zones, schedules, requests and playback state
//! - [`sonos`]: Device platform traits and the cloud control API client
//! - [`services`]: Group resolution, schedule evaluation, the queue state
//!   machine and the tick driver that runs them across zones
//! - [`api`]: Thin HTTP handlers for trigger, admin and webhook routes
//! - [`bootstrap`]: Composition root wiring everything together
//! - [`state`]: Core configuration
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! - [`SonosClient`](sonos::SonosClient): device platform access
//! - [`Clock`](clock::Clock): time source for schedule and cache math
//! - [`TaskSpawner`](runtime::TaskSpawner): detached background work

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod clock;
pub mod db;
pub mod error;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod sonos;
pub mod state;

// Re-export commonly used types at the crate root
pub use clock::{Clock, FixedClock, SystemClock};
pub use db::{Activity, Database, RequestStatus, StoreError, StoreResult, Zone};
pub use error::{ErrorCode, ZonecastError, ZonecastResult};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::Config;

// Re-export Sonos types
pub use sonos::types::{Group, PlaybackState, PlaybackStatus};
pub use sonos::{SonosClient, SonosCloudClient, SonosGroups, SonosPlayback};

// Re-export service types
pub use services::{
    GroupResolution, GroupResolver, QueueProcessor, ScheduleEvaluator, ScheduleExplanation,
    SchedulePromoter, TickDriver, TickSummary, ZoneLocks, ZoneOutcome,
};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_with_client, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
