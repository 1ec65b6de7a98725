//! Domain types for Sonos groups and playback status.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    PLAYBACK_STATE_BUFFERING, PLAYBACK_STATE_IDLE, PLAYBACK_STATE_PAUSED, PLAYBACK_STATE_PLAYING,
};

/// A live, addressable group of players in a household.
///
/// Group ids are ephemeral: Sonos mints a new id whenever players are
/// regrouped, so callers must never treat one as a stable zone identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub coordinator_id: String,
    pub player_ids: Vec<String>,
}

impl Group {
    /// Returns true if the group's members are exactly `player_ids`.
    ///
    /// Compared as sets: order and repeated ids do not matter, but every
    /// player must be present with no extras.
    #[must_use]
    pub fn has_exact_members(&self, player_ids: &[String]) -> bool {
        let members: HashSet<&str> = self.player_ids.iter().map(String::as_str).collect();
        let wanted: HashSet<&str> = player_ids.iter().map(String::as_str).collect();
        members == wanted
    }
}

/// Result of a group creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedGroup {
    pub id: String,
    pub player_ids: Vec<String>,
}

impl From<Group> for CreatedGroup {
    fn from(group: Group) -> Self {
        Self {
            id: group.id,
            player_ids: group.player_ids,
        }
    }
}

/// Transport state of a group as reported by the control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    #[serde(rename = "PLAYBACK_STATE_IDLE")]
    Idle,
    #[serde(rename = "PLAYBACK_STATE_PAUSED")]
    Paused,
    #[serde(rename = "PLAYBACK_STATE_PLAYING")]
    Playing,
    #[serde(rename = "PLAYBACK_STATE_BUFFERING")]
    Buffering,
}

impl PlaybackState {
    /// Returns the wire representation of this state.
    #[must_use]
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Idle => PLAYBACK_STATE_IDLE,
            Self::Paused => PLAYBACK_STATE_PAUSED,
            Self::Playing => PLAYBACK_STATE_PLAYING,
            Self::Buffering => PLAYBACK_STATE_BUFFERING,
        }
    }
}

/// Snapshot of a group's playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub playback_state: PlaybackState,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub position_millis: Option<i64>,
}

impl PlaybackStatus {
    /// Creates a status with no item loaded.
    #[must_use]
    pub fn new(playback_state: PlaybackState) -> Self {
        Self {
            playback_state,
            item_id: None,
            position_millis: None,
        }
    }

    /// Returns true while the group is producing (or about to produce) audio.
    ///
    /// Buffering counts as playing: a freshly loaded track buffers briefly and
    /// must not be mistaken for a finished one.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(
            self.playback_state,
            PlaybackState::Playing | PlaybackState::Buffering
        )
    }
}
