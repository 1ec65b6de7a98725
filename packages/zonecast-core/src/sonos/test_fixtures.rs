//! In-memory device platform shared by service tests.
//!
//! `MockSonos` holds a mutable household topology and one playback status per
//! group, and records every call so tests can assert on exact command order.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::sonos::control::{ControlError, ControlResult};
use crate::sonos::traits::{SonosGroups, SonosPlayback};
use crate::sonos::types::{CreatedGroup, Group, PlaybackState, PlaybackStatus};

/// A recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetGroups(String),
    CreateGroup(Vec<String>),
    GetStatus(String),
    LoadTrack(String, String),
    LoadPlaylist(String, String),
    Play(String),
    Pause(String),
}

impl Call {
    /// True for calls that change what a group is doing.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::CreateGroup(_)
                | Call::LoadTrack(..)
                | Call::LoadPlaylist(..)
                | Call::Play(_)
                | Call::Pause(_)
        )
    }
}

pub struct MockSonos {
    pub groups: Mutex<Vec<Group>>,
    pub status: Mutex<PlaybackStatus>,
    pub calls: Mutex<Vec<Call>>,
    /// HTTP status returned by `load_track` when set.
    pub fail_load_track: Mutex<Option<u16>>,
    /// HTTP status returned by `get_playback_status` when set.
    pub fail_status: Mutex<Option<u16>>,
    /// HTTP status returned by `pause` when set.
    pub fail_pause: Mutex<Option<u16>>,
    next_group: Mutex<u32>,
}

impl MockSonos {
    pub fn new(groups: Vec<Group>) -> Self {
        Self {
            groups: Mutex::new(groups),
            status: Mutex::new(PlaybackStatus::new(PlaybackState::Idle)),
            calls: Mutex::new(Vec::new()),
            fail_load_track: Mutex::new(None),
            fail_status: Mutex::new(None),
            fail_pause: Mutex::new(None),
            next_group: Mutex::new(1),
        }
    }

    pub fn set_status(&self, state: PlaybackState, item_id: Option<&str>) {
        *self.status.lock() = PlaybackStatus {
            playback_state: state,
            item_id: item_id.map(str::to_string),
            position_millis: Some(42_000),
        };
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateGroup(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

/// Builds a group whose coordinator is its first player.
pub fn group(id: &str, players: &[&str]) -> Group {
    Group {
        id: id.to_string(),
        name: id.to_string(),
        coordinator_id: players.first().copied().unwrap_or_default().to_string(),
        player_ids: players.iter().map(|p| p.to_string()).collect(),
    }
}

#[async_trait]
impl SonosGroups for MockSonos {
    async fn get_groups(&self, household_id: &str) -> ControlResult<Vec<Group>> {
        self.record(Call::GetGroups(household_id.to_string()));
        Ok(self.groups.lock().clone())
    }

    async fn create_group(
        &self,
        _household_id: &str,
        player_ids: &[String],
    ) -> ControlResult<CreatedGroup> {
        self.record(Call::CreateGroup(player_ids.to_vec()));
        let id = {
            let mut next = self.next_group.lock();
            let id = format!("{}:new{}", player_ids[0], *next);
            *next += 1;
            id
        };

        // Creating a group pulls its players out of whatever group held them.
        let mut groups = self.groups.lock();
        for g in groups.iter_mut() {
            g.player_ids.retain(|p| !player_ids.contains(p));
        }
        groups.retain(|g| !g.player_ids.is_empty());
        let created = Group {
            id: id.clone(),
            name: id.clone(),
            coordinator_id: player_ids[0].clone(),
            player_ids: player_ids.to_vec(),
        };
        groups.push(created.clone());
        Ok(created.into())
    }
}

#[async_trait]
impl SonosPlayback for MockSonos {
    async fn get_playback_status(&self, group_id: &str) -> ControlResult<PlaybackStatus> {
        self.record(Call::GetStatus(group_id.to_string()));
        if let Some(code) = *self.fail_status.lock() {
            return Err(ControlError::HttpStatus(code, "simulated".into()));
        }
        Ok(self.status.lock().clone())
    }

    async fn load_track(&self, group_id: &str, track_uri: &str, _play: bool) -> ControlResult<()> {
        self.record(Call::LoadTrack(group_id.to_string(), track_uri.to_string()));
        if let Some(code) = *self.fail_load_track.lock() {
            return Err(ControlError::HttpStatus(code, "simulated".into()));
        }
        self.set_status(PlaybackState::Playing, Some(track_uri));
        Ok(())
    }

    async fn load_playlist(
        &self,
        group_id: &str,
        playlist_uri: &str,
        _play: bool,
    ) -> ControlResult<()> {
        self.record(Call::LoadPlaylist(
            group_id.to_string(),
            playlist_uri.to_string(),
        ));
        self.set_status(PlaybackState::Playing, Some(playlist_uri));
        Ok(())
    }

    async fn play(&self, group_id: &str) -> ControlResult<()> {
        self.record(Call::Play(group_id.to_string()));
        Ok(())
    }

    async fn pause(&self, group_id: &str) -> ControlResult<()> {
        self.record(Call::Pause(group_id.to_string()));
        if let Some(code) = *self.fail_pause.lock() {
            return Err(ControlError::HttpStatus(code, "simulated".into()));
        }
        let mut status = self.status.lock();
        status.playback_state = PlaybackState::Paused;
        Ok(())
    }
}
