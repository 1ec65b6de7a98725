//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Core settings sit at the top level of the file next to the server's own.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `ZONECAST_BIND_PORT`
    pub bind_port: u16,

    /// SQLite database file.
    /// Override: `ZONECAST_DATABASE_PATH`
    pub database_path: PathBuf,

    /// Orchestration settings.
    #[serde(flatten)]
    pub core: zonecast_core::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 8080,
            database_path: PathBuf::from("zonecast.db"),
            core: zonecast_core::Config::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies `ZONECAST_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored with a warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> Option<T> {
            match value.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    log::warn!("Ignoring unparseable {}={}", key, value);
                    None
                }
            }
        }

        macro_rules! number {
            ($key:literal, $field:expr) => {
                if let Some(v) = lookup($key).and_then(|v| parsed($key, v)) {
                    $field = v;
                }
            };
        }
        macro_rules! secret {
            ($key:literal, $field:expr) => {
                if let Some(v) = lookup($key).filter(|v| !v.is_empty()) {
                    $field = Some(v);
                }
            };
        }

        number!("ZONECAST_BIND_PORT", self.bind_port);
        if let Some(path) = lookup("ZONECAST_DATABASE_PATH").filter(|v| !v.is_empty()) {
            self.database_path = PathBuf::from(path);
        }

        let core = &mut self.core;
        number!("ZONECAST_TICK_INTERVAL_SECS", core.tick_interval_secs);
        number!("ZONECAST_SCHEDULE_CHECK_INTERVAL_SECS", core.schedule_check_interval_secs);
        number!("ZONECAST_ZONE_TIMEOUT_SECS", core.zone_timeout_secs);
        number!("ZONECAST_HOUSEHOLD_CONCURRENCY", core.household_concurrency);
        number!("ZONECAST_RUN_INTERNAL_TICKS", core.run_internal_ticks);
        if let Some(base) = lookup("ZONECAST_SONOS_API_BASE").filter(|v| !v.is_empty()) {
            core.sonos_api_base = base;
        }
        secret!("ZONECAST_SONOS_ACCESS_TOKEN", core.sonos_access_token);
        secret!("ZONECAST_SONOS_CLIENT_ID", core.sonos_client_id);
        secret!("ZONECAST_SONOS_CLIENT_SECRET", core.sonos_client_secret);
        secret!("ZONECAST_TRIGGER_SECRET", core.trigger_secret);
    }

    /// The orchestration config handed to the core.
    pub fn to_core_config(&self) -> zonecast_core::Config {
        self.core.clone()
    }
}
