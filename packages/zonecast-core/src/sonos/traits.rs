//! Trait abstractions for Sonos operations.
//!
//! These traits enable dependency injection for testability and modularity.
//! Services depend on traits rather than concrete implementations.

use async_trait::async_trait;

use crate::sonos::control::ControlResult;
use crate::sonos::types::{CreatedGroup, Group, PlaybackStatus};

/// Trait for household group topology operations.
///
/// Used by `GroupResolver` to match and create groups for zones.
#[async_trait]
pub trait SonosGroups: Send + Sync {
    /// Lists the live groups of a household.
    ///
    /// Players that appear in no group are offline.
    async fn get_groups(&self, household_id: &str) -> ControlResult<Vec<Group>>;

    /// Creates a new group containing exactly `player_ids`.
    ///
    /// The platform picks the coordinator and returns the new group id.
    async fn create_group(
        &self,
        household_id: &str,
        player_ids: &[String],
    ) -> ControlResult<CreatedGroup>;
}

/// Trait for group playback control operations.
///
/// Used by `QueueProcessor` and `SchedulePromoter` to sense and drive playback.
#[async_trait]
pub trait SonosPlayback: Send + Sync {
    /// Fetches the current playback status of a group.
    async fn get_playback_status(&self, group_id: &str) -> ControlResult<PlaybackStatus>;

    /// Loads a single track, replacing whatever is loaded.
    ///
    /// # Arguments
    /// * `group_id` - Target group
    /// * `track_uri` - Content URI (`service:track:id`)
    /// * `play_on_completion` - Start playing once the load finishes
    async fn load_track(
        &self,
        group_id: &str,
        track_uri: &str,
        play_on_completion: bool,
    ) -> ControlResult<()>;

    /// Loads a playlist from its start, replacing whatever is loaded.
    ///
    /// # Arguments
    /// * `group_id` - Target group
    /// * `playlist_uri` - Content URI (`service:playlist:id`)
    /// * `play_on_completion` - Start playing once the load finishes
    async fn load_playlist(
        &self,
        group_id: &str,
        playlist_uri: &str,
        play_on_completion: bool,
    ) -> ControlResult<()>;

    /// Resumes playback of whatever is loaded.
    async fn play(&self, group_id: &str) -> ControlResult<()>;

    /// Pauses playback.
    async fn pause(&self, group_id: &str) -> ControlResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Combined Traits (for trait objects)
// ─────────────────────────────────────────────────────────────────────────────

/// Combined trait for all device platform operations.
///
/// Used by `BootstrappedServices` to share one client across services.
#[async_trait]
pub trait SonosClient: SonosGroups + SonosPlayback {}

/// Blanket implementation for any type implementing both traits.
impl<T: SonosGroups + SonosPlayback> SonosClient for T {}
