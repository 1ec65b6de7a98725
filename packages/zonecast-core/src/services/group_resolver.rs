//! Maps a zone's durable device set onto a live, addressable group.
//!
//! Group ids are volatile: Sonos mints a new one whenever players regroup.
//! The zone's `device_player_ids` are the source of truth and the cached
//! `sonos_group_id` is only a hint that is re-validated against live
//! membership before use.
//!
//! Resolution order, first success wins:
//! 1. Legacy zones without devices use their cached id verbatim.
//! 2. A fresh cached id whose live members exactly match the device set.
//! 3. Any live group whose members exactly match the device set.
//! 4. A newly created group of the zone's online devices (possibly partial).

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::db::{Database, StoreError, Zone};
use crate::sonos::types::Group;
use crate::sonos::{ControlError, SonosClient};

/// Errors that abort resolution for one zone.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Zone has neither devices nor a cached legacy group id.
    #[error("Zone {0} has no devices and no cached group")]
    NoDeviceConfig(String),

    /// None of the zone's devices appear in any live group.
    #[error("No devices of zone {0} are online")]
    NoDevicesOnline(String),

    /// Device platform call failed.
    #[error("Device platform error: {0}")]
    Platform(#[from] ControlError),

    /// Group cache could not be written.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenient Result alias for group resolution.
pub type ResolutionResult<T> = Result<T, ResolutionError>;

/// A resolved group for one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResolution {
    pub group_id: String,
    /// True if the group was created by this resolution.
    pub was_created: bool,
    /// Players of the returned group. Empty for legacy zones.
    pub player_ids: Vec<String>,
    /// True if the group was created with fewer players than configured.
    pub is_partial_group: bool,
}

impl GroupResolution {
    fn existing(group_id: String, player_ids: Vec<String>) -> Self {
        Self {
            group_id,
            was_created: false,
            player_ids,
            is_partial_group: false,
        }
    }
}

/// Resolves zones to live group ids, writing through the zone's cache.
pub struct GroupResolver {
    db: Database,
    sonos: Arc<dyn SonosClient>,
    clock: Arc<dyn Clock>,
    default_ttl_minutes: i64,
    /// Serializes search-and-create per household so two zones sharing
    /// players never race each other's group creation.
    household_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GroupResolver {
    pub fn new(
        db: Database,
        sonos: Arc<dyn SonosClient>,
        clock: Arc<dyn Clock>,
        default_ttl_minutes: i64,
    ) -> Self {
        Self {
            db,
            sonos,
            clock,
            default_ttl_minutes,
            household_locks: DashMap::new(),
        }
    }

    /// Resolves `zone` to a usable group id.
    pub async fn resolve(&self, zone: &Zone, household_id: &str) -> ResolutionResult<GroupResolution> {
        self.resolve_inner(zone, household_id, true).await
    }

    /// Resolves `zone` ignoring its cached group id.
    pub async fn refresh(&self, zone: &Zone, household_id: &str) -> ResolutionResult<GroupResolution> {
        self.resolve_inner(zone, household_id, false).await
    }

    async fn resolve_inner(
        &self,
        zone: &Zone,
        household_id: &str,
        use_cache: bool,
    ) -> ResolutionResult<GroupResolution> {
        if zone.device_player_ids.is_empty() {
            return Self::legacy_fallback(zone);
        }

        let lock = self.household_lock(household_id);
        let _guard = lock.lock().await;

        let groups = self.sonos.get_groups(household_id).await?;
        let now = self.clock.now();

        if use_cache && zone.cache_is_fresh(now, self.default_ttl_minutes) {
            if let Some(hit) = Self::validate_cached(zone, &groups) {
                log::debug!(
                    "[GroupResolver] Zone {}: cache hit {}",
                    zone.name,
                    hit.group_id
                );
                return Ok(hit);
            }
            log::info!(
                "[GroupResolver] Zone {}: cached group {:?} no longer matches devices",
                zone.name,
                zone.sonos_group_id
            );
        }

        if let Some(group) = groups
            .iter()
            .find(|g| g.has_exact_members(&zone.device_player_ids))
        {
            log::info!(
                "[GroupResolver] Zone {}: found matching group {}",
                zone.name,
                group.id
            );
            self.db.update_group_cache(&zone.id, &group.id, now).await?;
            return Ok(GroupResolution::existing(
                group.id.clone(),
                group.player_ids.clone(),
            ));
        }

        self.create_group(zone, household_id, &groups).await
    }

    fn legacy_fallback(zone: &Zone) -> ResolutionResult<GroupResolution> {
        match &zone.sonos_group_id {
            Some(group_id) => {
                log::debug!(
                    "[GroupResolver] Zone {} has no devices, using legacy group {}",
                    zone.name,
                    group_id
                );
                Ok(GroupResolution::existing(group_id.clone(), Vec::new()))
            }
            None => Err(ResolutionError::NoDeviceConfig(zone.id.clone())),
        }
    }

    fn validate_cached(zone: &Zone, groups: &[Group]) -> Option<GroupResolution> {
        let cached = zone.sonos_group_id.as_deref()?;
        groups
            .iter()
            .find(|g| g.id == cached && g.has_exact_members(&zone.device_player_ids))
            .map(|g| GroupResolution::existing(g.id.clone(), g.player_ids.clone()))
    }

    async fn create_group(
        &self,
        zone: &Zone,
        household_id: &str,
        groups: &[Group],
    ) -> ResolutionResult<GroupResolution> {
        let visible: HashSet<&str> = groups
            .iter()
            .flat_map(|g| g.player_ids.iter().map(String::as_str))
            .collect();

        let mut seen = HashSet::new();
        let wanted: Vec<&String> = zone
            .device_player_ids
            .iter()
            .filter(|p| seen.insert(p.as_str()))
            .collect();
        let online: Vec<String> = wanted
            .iter()
            .filter(|p| visible.contains(p.as_str()))
            .map(|p| (*p).clone())
            .collect();

        if online.is_empty() {
            log::warn!(
                "[GroupResolver] Zone {}: none of {} device(s) are online",
                zone.name,
                wanted.len()
            );
            return Err(ResolutionError::NoDevicesOnline(zone.id.clone()));
        }

        let is_partial_group = online.len() < wanted.len();
        if is_partial_group {
            let offline: Vec<&str> = wanted
                .iter()
                .filter(|p| !visible.contains(p.as_str()))
                .map(|p| p.as_str())
                .collect();
            log::warn!(
                "[GroupResolver] Zone {}: creating partial group, offline: {:?}",
                zone.name,
                offline
            );
        }

        let created = self.sonos.create_group(household_id, &online).await?;
        log::info!(
            "[GroupResolver] Zone {}: created group {} with {} player(s)",
            zone.name,
            created.id,
            created.player_ids.len()
        );
        self.db
            .update_group_cache(&zone.id, &created.id, self.clock.now())
            .await?;

        Ok(GroupResolution {
            group_id: created.id,
            was_created: true,
            player_ids: created.player_ids,
            is_partial_group,
        })
    }

    fn household_lock(&self, household_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.household_locks
                .entry(household_id.to_string())
                .or_default()
                .value(),
        )
    }
}
