//! Environment and zone records, including the zone's group-id cache.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::models::{
    decode_optional_timestamp, decode_string_list, encode_timestamp, parse_timezone,
    DEFAULT_GROUP_CACHE_TTL_MINUTES,
};
use super::{Database, Environment, StoreError, StoreResult, Zone, ZoneTarget};

/// Input for [`Database::insert_environment`].
#[derive(Debug, Clone)]
pub struct NewEnvironment {
    /// Generated when `None`.
    pub id: Option<String>,
    pub name: String,
    pub timezone: String,
    pub household_id: String,
}

/// Input for [`Database::insert_zone`].
#[derive(Debug, Clone)]
pub struct NewZone {
    /// Generated when `None`.
    pub id: Option<String>,
    pub name: String,
    pub environment_id: String,
    pub device_player_ids: Vec<String>,
    /// Pre-migration zones carry only a group id and no devices.
    pub sonos_group_id: Option<String>,
    pub group_id_cache_ttl_minutes: Option<i64>,
}

const ZONE_COLUMNS: &str = "z.id, z.name, z.environment_id, z.device_player_ids, \
     z.sonos_group_id, z.group_id_cached_at, z.group_id_cache_ttl_minutes";

fn zone_from_row(row: &SqliteRow) -> StoreResult<Zone> {
    let devices: String = row.try_get("device_player_ids")?;
    Ok(Zone {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        environment_id: row.try_get("environment_id")?,
        device_player_ids: decode_string_list(&devices)?,
        sonos_group_id: row.try_get("sonos_group_id")?,
        group_id_cached_at: decode_optional_timestamp(row.try_get("group_id_cached_at")?)?,
        group_id_cache_ttl_minutes: row.try_get("group_id_cache_ttl_minutes")?,
    })
}

fn environment_from_row(row: &SqliteRow) -> StoreResult<Environment> {
    Ok(Environment {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        timezone: row.try_get("timezone")?,
        household_id: row.try_get("household_id")?,
    })
}

impl Database {
    // ─────────────────────────────────────────────────────────────────────────
    // Environments
    // ─────────────────────────────────────────────────────────────────────────

    /// Inserts an environment after validating its time zone name.
    pub async fn insert_environment(&self, env: &NewEnvironment) -> StoreResult<Environment> {
        parse_timezone(&env.timezone)?;
        let id = env.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        sqlx::query(
            "INSERT INTO environments (id, name, timezone, household_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&env.name)
        .bind(&env.timezone)
        .bind(&env.household_id)
        .execute(&self.pool)
        .await?;

        Ok(Environment {
            id,
            name: env.name.clone(),
            timezone: env.timezone.clone(),
            household_id: env.household_id.clone(),
        })
    }

    pub async fn get_environment(&self, id: &str) -> StoreResult<Environment> {
        let row = sqlx::query("SELECT id, name, timezone, household_id FROM environments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("environment {id}")))?;
        environment_from_row(&row)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Zones
    // ─────────────────────────────────────────────────────────────────────────

    /// Inserts a zone together with its initial `idle` playback state.
    pub async fn insert_zone(&self, zone: &NewZone) -> StoreResult<Zone> {
        let id = zone.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let devices = serde_json::to_string(&zone.device_player_ids)
            .map_err(|e| StoreError::Invalid(format!("device list: {e}")))?;
        let ttl = zone
            .group_id_cache_ttl_minutes
            .unwrap_or(DEFAULT_GROUP_CACHE_TTL_MINUTES);
        let now = encode_timestamp(Utc::now());

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO zones (id, name, environment_id, device_player_ids,
                               sonos_group_id, group_id_cache_ttl_minutes)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&zone.name)
        .bind(&zone.environment_id)
        .bind(&devices)
        .bind(&zone.sonos_group_id)
        .bind(ttl)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO playback_state (zone_id, current_activity, last_updated) VALUES (?, 'idle', ?)",
        )
        .bind(&id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Zone {
            id,
            name: zone.name.clone(),
            environment_id: zone.environment_id.clone(),
            device_player_ids: zone.device_player_ids.clone(),
            sonos_group_id: zone.sonos_group_id.clone(),
            group_id_cached_at: None,
            group_id_cache_ttl_minutes: ttl,
        })
    }

    pub async fn get_zone(&self, id: &str) -> StoreResult<Zone> {
        let row = sqlx::query(&format!("SELECT {ZONE_COLUMNS} FROM zones z WHERE z.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("zone {id}")))?;
        zone_from_row(&row)
    }

    /// All zones, each paired with its environment's household id.
    ///
    /// The household is `None` when the environment row is missing; callers
    /// treat that as a data error for that zone only.
    pub async fn list_zones_with_household(&self) -> StoreResult<Vec<(Zone, Option<String>)>> {
        let rows = sqlx::query(&format!(
            "SELECT {ZONE_COLUMNS}, e.household_id AS household_id \
             FROM zones z LEFT JOIN environments e ON e.id = z.environment_id \
             ORDER BY z.name, z.id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<(Zone, Option<String>)> {
                Ok((zone_from_row(row)?, row.try_get("household_id")?))
            })
            .collect()
    }

    /// One zone joined with its household.
    pub async fn zone_target(&self, zone_id: &str) -> StoreResult<ZoneTarget> {
        let zone = self.get_zone(zone_id).await?;
        let env = self.get_environment(&zone.environment_id).await?;
        Ok(ZoneTarget {
            zone,
            household_id: env.household_id,
        })
    }

    /// Writes a freshly resolved group id and its cache timestamp.
    pub async fn update_group_cache(
        &self,
        zone_id: &str,
        group_id: &str,
        cached_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE zones SET sonos_group_id = ?, group_id_cached_at = ? WHERE id = ?",
        )
        .bind(group_id)
        .bind(encode_timestamp(cached_at))
        .bind(zone_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("zone {zone_id}")));
        }
        Ok(())
    }

    /// Finds the zone whose cached group id equals `group_id`.
    pub async fn find_zone_by_group_id(&self, group_id: &str) -> StoreResult<Option<Zone>> {
        let row = sqlx::query(&format!(
            "SELECT {ZONE_COLUMNS} FROM zones z WHERE z.sonos_group_id = ? LIMIT 1"
        ))
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(zone_from_row).transpose()
    }
}
