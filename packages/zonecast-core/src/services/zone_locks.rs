//! Per-zone mutual exclusion shared by the queue and schedule ticks.
//!
//! Both ticks read playback state, talk to the group and write state back.
//! Holding the zone's lock across that sequence keeps an overlapping tick
//! (a duplicate trigger, or the other tick kind) from acting on stale state.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct ZoneLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ZoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared lock table.
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Waits for exclusive access to `zone_id`, held until the guard drops.
    pub async fn lock(&self, zone_id: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(zone_id.to_string()).or_default().value());
        lock.lock_owned().await
    }
}
