//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together.

use std::sync::Arc;

use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, ServerError};
use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::error::{ZonecastError, ZonecastResult};
use crate::runtime::TokioSpawner;
use crate::services::{
    GroupResolver, QueueProcessor, ScheduleEvaluator, SchedulePromoter, TickDriver, ZoneLocks,
};
use crate::sonos::{SonosClient, SonosCloudClient, StaticToken};
use crate::state::Config;

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    pub db: Database,
    /// Device platform client.
    pub sonos: Arc<dyn SonosClient>,
    pub clock: Arc<dyn Clock>,
    pub resolver: Arc<GroupResolver>,
    pub evaluator: Arc<ScheduleEvaluator>,
    pub driver: Arc<TickDriver>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    config: Arc<Config>,
    loops: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl BootstrappedServices {
    /// Starts the internal tick loops, unless disabled in config.
    ///
    /// Returns false when the loops are disabled.
    pub fn start_tick_loops(&self) -> bool {
        if !self.config.run_internal_ticks {
            log::info!("[Bootstrap] Internal ticks disabled; waiting for external triggers");
            return false;
        }
        let handles = self.driver.spawn_loops(
            self.config.tick_interval(),
            self.config.schedule_check_interval(),
            self.cancel_token.clone(),
        );
        self.loops.lock().extend(handles);
        true
    }

    /// Builds the HTTP layer's state from these services.
    pub fn app_state(&self) -> Result<AppState, ServerError> {
        AppState::builder()
            .db(self.db.clone())
            .driver(Arc::clone(&self.driver))
            .clock(Arc::clone(&self.clock))
            .spawner(self.spawner.clone())
            .config(Arc::clone(&self.config))
            .build()
    }

    /// Stops the tick loops and closes the database.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();

        let handles: Vec<JoinHandle<()>> = self.loops.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                log::warn!("[Bootstrap] Tick loop ended abnormally: {}", e);
            }
        }

        self.db.close().await;
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for all device platform calls.
///
/// Per-call timeouts are applied by the control layer.
fn create_http_client() -> ZonecastResult<Client> {
    Client::builder()
        .build()
        .map_err(|e| ZonecastError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all services against the cloud control API.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the HTTP client cannot
/// be built.
pub fn bootstrap_services(config: &Config, db: Database) -> ZonecastResult<BootstrappedServices> {
    config.validate().map_err(ZonecastError::Configuration)?;
    if config.sonos_access_token.is_none() {
        log::warn!("[Bootstrap] No Sonos access token configured; device calls will be rejected");
    }

    let http_client = create_http_client()?;
    let sonos: Arc<dyn SonosClient> = Arc::new(SonosCloudClient::new(
        http_client,
        config.sonos_api_base.clone(),
        Arc::new(StaticToken::new(config.sonos_access_token.clone())),
        config.control_timeout(),
    ));

    bootstrap_with_client(config, db, sonos, SystemClock::arc())
}

/// Wires services around an existing device client and clock.
pub fn bootstrap_with_client(
    config: &Config,
    db: Database,
    sonos: Arc<dyn SonosClient>,
    clock: Arc<dyn Clock>,
) -> ZonecastResult<BootstrappedServices> {
    config.validate().map_err(ZonecastError::Configuration)?;

    let resolver = Arc::new(GroupResolver::new(
        db.clone(),
        Arc::clone(&sonos),
        Arc::clone(&clock),
        config.default_group_cache_ttl_minutes,
    ));
    let evaluator = Arc::new(ScheduleEvaluator::new(db.clone(), Arc::clone(&clock)));
    let zone_locks = ZoneLocks::arc();
    let processor = Arc::new(QueueProcessor::new(
        db.clone(),
        Arc::clone(&sonos),
        Arc::clone(&resolver),
        Arc::clone(&evaluator),
        Arc::clone(&clock),
        Arc::clone(&zone_locks),
        config.pause_settle(),
    ));
    let promoter = Arc::new(SchedulePromoter::new(
        db.clone(),
        Arc::clone(&sonos),
        Arc::clone(&resolver),
        Arc::clone(&evaluator),
        Arc::clone(&clock),
        Arc::clone(&zone_locks),
    ));
    let driver = Arc::new(TickDriver::new(
        db.clone(),
        processor,
        promoter,
        Arc::clone(&resolver),
        config.zone_timeout(),
        config.household_concurrency,
    ));

    Ok(BootstrappedServices {
        db,
        sonos,
        clock,
        resolver,
        evaluator,
        driver,
        spawner: TokioSpawner::current(),
        cancel_token: CancellationToken::new(),
        config: Arc::new(config.clone()),
        loops: parking_lot::Mutex::new(Vec::new()),
    })
}
