//! Core configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{CONTROL_TIMEOUT_SECS, SONOS_CONTROL_API_BASE};
use crate::sonos::retry::worst_case_duration;

/// Configuration for the orchestration core.
///
/// All fields have sensible defaults; a config file only needs to name what
/// it changes.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Ticks
    /// Interval of the queue tick over all zones (seconds).
    pub tick_interval_secs: u64,

    /// Interval of the schedule promotion tick (seconds).
    pub schedule_check_interval_secs: u64,

    /// Upper bound on one zone's processing within a tick (seconds).
    pub zone_timeout_secs: u64,

    /// Delay between pausing a group and loading a visitor track (milliseconds).
    pub pause_settle_ms: u64,

    /// Households processed concurrently. Zones within one household are
    /// always processed one at a time.
    pub household_concurrency: usize,

    /// Spawn the internal tick loops. Disable when an external scheduler
    /// calls the trigger endpoints instead.
    pub run_internal_ticks: bool,

    // Group resolution
    /// Cache TTL for zones that do not define their own (minutes).
    pub default_group_cache_ttl_minutes: i64,

    // Device platform
    /// Base URL of the Sonos control API.
    pub sonos_api_base: String,

    /// Timeout for a single control API call (seconds). With retries, one
    /// call must still fit inside `zone_timeout_secs`.
    pub control_timeout_secs: u64,

    /// Static bearer token for the control API.
    pub sonos_access_token: Option<String>,

    /// Integration client id, used to verify webhook signatures.
    pub sonos_client_id: Option<String>,

    /// Integration client secret, used to verify webhook signatures.
    pub sonos_client_secret: Option<String>,

    // Triggers
    /// Bearer secret required on trigger and admin routes, if set.
    pub trigger_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            schedule_check_interval_secs: 300,
            zone_timeout_secs: 30,
            pause_settle_ms: 500,
            household_concurrency: 1,
            run_internal_ticks: true,
            default_group_cache_ttl_minutes: 30,
            sonos_api_base: SONOS_CONTROL_API_BASE.to_string(),
            control_timeout_secs: CONTROL_TIMEOUT_SECS,
            sonos_access_token: None,
            sonos_client_id: None,
            sonos_client_secret: None,
            trigger_secret: None,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_secs == 0 {
            return Err("tick_interval_secs must be >= 1".to_string());
        }
        if self.schedule_check_interval_secs == 0 {
            return Err("schedule_check_interval_secs must be >= 1".to_string());
        }
        if self.zone_timeout_secs == 0 {
            return Err("zone_timeout_secs must be >= 1".to_string());
        }
        if self.control_timeout_secs == 0 {
            return Err("control_timeout_secs must be >= 1".to_string());
        }
        if self.household_concurrency == 0 {
            return Err("household_concurrency must be >= 1".to_string());
        }
        if self.default_group_cache_ttl_minutes <= 0 {
            return Err("default_group_cache_ttl_minutes must be >= 1".to_string());
        }
        let retried_call = worst_case_duration(self.control_timeout());
        if retried_call >= self.zone_timeout() {
            return Err(format!(
                "zone_timeout_secs ({}) must exceed a fully retried control call ({:?})",
                self.zone_timeout_secs, retried_call
            ));
        }
        if self.sonos_api_base.trim().is_empty() {
            return Err("sonos_api_base must not be empty".to_string());
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn schedule_check_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_check_interval_secs)
    }

    pub fn zone_timeout(&self) -> Duration {
        Duration::from_secs(self.zone_timeout_secs)
    }

    pub fn pause_settle(&self) -> Duration {
        Duration::from_millis(self.pause_settle_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    /// Webhook credentials, when both halves are configured.
    pub fn webhook_credentials(&self) -> Option<(&str, &str)> {
        match (&self.sonos_client_id, &self.sonos_client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.as_str(), secret.as_str()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.schedule_check_interval(), Duration::from_secs(300));
        assert_eq!(config.household_concurrency, 1);
    }

    #[test]
    fn rejects_zero_values() {
        let config = Config {
            zone_timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("zone_timeout_secs"));

        let config = Config {
            household_concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_retry_budget_beyond_zone_timeout() {
        let config = Config {
            control_timeout_secs: 10,
            zone_timeout_secs: 30,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("zone_timeout_secs"));

        let config = Config {
            control_timeout_secs: 10,
            zone_timeout_secs: 45,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"pause_settle_ms": 250}"#).unwrap();
        assert_eq!(config.pause_settle(), Duration::from_millis(250));
        assert_eq!(config.zone_timeout_secs, 30);
    }

    #[test]
    fn webhook_credentials_need_both_halves() {
        let mut config = Config {
            sonos_client_id: Some("id".into()),
            ..Config::default()
        };
        assert!(config.webhook_credentials().is_none());
        config.sonos_client_secret = Some("secret".into());
        assert_eq!(config.webhook_credentials(), Some(("id", "secret")));
    }
}
