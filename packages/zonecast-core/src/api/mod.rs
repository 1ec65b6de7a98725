//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::clock::Clock;
use crate::db::Database;
use crate::runtime::TokioSpawner;
use crate::services::TickDriver;
use crate::state::Config;

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Server stopped with an I/O error.
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    /// The state builder was missing a required component.
    #[error("Missing application state component: {0}")]
    MissingState(&'static str),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
#[derive(Clone)]
pub struct AppState {
    /// Orchestration database.
    pub db: Database,
    /// Runs queue, schedule and refresh passes over all zones.
    pub driver: Arc<TickDriver>,
    /// Time source for webhook touches.
    pub clock: Arc<dyn Clock>,
    /// Spawner for work that must not delay a response.
    pub spawner: TokioSpawner,
    /// Application configuration.
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    db: Option<Database>,
    driver: Option<Arc<TickDriver>>,
    clock: Option<Arc<dyn Clock>>,
    spawner: Option<TokioSpawner>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn db(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn driver(mut self, driver: Arc<TickDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn spawner(mut self, spawner: TokioSpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`, failing if a required component is missing.
    pub fn build(self) -> Result<AppState, ServerError> {
        Ok(AppState {
            db: self.db.ok_or(ServerError::MissingState("db"))?,
            driver: self.driver.ok_or(ServerError::MissingState("driver"))?,
            clock: self.clock.ok_or(ServerError::MissingState("clock"))?,
            spawner: self.spawner.ok_or(ServerError::MissingState("spawner"))?,
            config: self.config.ok_or(ServerError::MissingState("config"))?,
        })
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Serves the API on `addr` until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    log::info!("[Server] Listening on http://{}", addr);
    let app = http::create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    log::info!("[Server] Stopped");
    Ok(())
}
