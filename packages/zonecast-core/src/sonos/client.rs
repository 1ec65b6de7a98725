//! High-level Sonos client commands.
//!
//! [`SonosCloudClient`] implements the platform traits on top of the cloud
//! control API. Every call is authenticated and bounded by a timeout. Reads,
//! play and pause are retried on transient failures; group creation and loads
//! only when the failed attempt cannot have reached the platform.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::sonos::control::{ControlError, ControlRequestBuilder, ControlResult, TokenSource};
use crate::sonos::retry::{with_retry, RetryPolicy};
use crate::sonos::traits::{SonosGroups, SonosPlayback};
use crate::sonos::types::{CreatedGroup, Group, PlaybackStatus};

#[derive(Deserialize)]
struct GroupsResponse {
    #[serde(default)]
    groups: Vec<Group>,
}

#[derive(Deserialize)]
struct CreateGroupResponse {
    group: Group,
}

/// Splits a content URI of the form `service:kind:id`.
///
/// Returns `(service, kind, id)` or `InvalidUri` for anything else.
pub fn parse_content_uri(uri: &str) -> ControlResult<(&str, &str, &str)> {
    let mut parts = uri.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(kind), Some(id))
            if !service.is_empty() && !kind.is_empty() && !id.is_empty() =>
        {
            Ok((service, kind, id))
        }
        _ => Err(ControlError::InvalidUri(uri.to_string())),
    }
}

/// Concrete device platform client for the Sonos cloud control API.
pub struct SonosCloudClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    timeout: Duration,
}

impl SonosCloudClient {
    /// Creates a client sharing the given HTTP connection pool.
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens,
            timeout,
        }
    }

    fn request(&self) -> ControlRequestBuilder<'_> {
        ControlRequestBuilder::new(&self.http, &self.base_url, self.tokens.access_token())
            .timeout(self.timeout)
    }

    /// Path for loading content of `kind` into a group.
    fn load_path(group_id: &str, kind: &str, uri: &str) -> ControlResult<String> {
        let (service, uri_kind, id) = parse_content_uri(uri)?;
        if uri_kind != kind {
            return Err(ControlError::InvalidUri(format!(
                "expected a {} URI, got {}",
                kind, uri
            )));
        }
        Ok(format!(
            "/groups/{}/playback/{}/{}:{}:{}",
            group_id, kind, service, kind, id
        ))
    }
}

#[async_trait]
impl SonosGroups for SonosCloudClient {
    async fn get_groups(&self, household_id: &str) -> ControlResult<Vec<Group>> {
        let path = format!("/households/{}/groups", household_id);
        let response: GroupsResponse =
            with_retry("GetGroups", RetryPolicy::Idempotent, || {
                self.request().get(path.clone()).send_json()
            })
            .await?;
        Ok(response.groups)
    }

    async fn create_group(
        &self,
        household_id: &str,
        player_ids: &[String],
    ) -> ControlResult<CreatedGroup> {
        log::info!(
            "[Sonos] Creating group in household {} with players {:?}",
            household_id,
            player_ids
        );
        let path = format!("/households/{}/groups/createGroup", household_id);
        let body = json!({ "playerIds": player_ids });
        let response: CreateGroupResponse = with_retry("CreateGroup", RetryPolicy::NotApplied, || {
            self.request()
                .post(path.clone())
                .json(body.clone())
                .send_json()
        })
        .await?;
        Ok(response.group.into())
    }
}

#[async_trait]
impl SonosPlayback for SonosCloudClient {
    async fn get_playback_status(&self, group_id: &str) -> ControlResult<PlaybackStatus> {
        let path = format!("/groups/{}/playback", group_id);
        with_retry("GetPlaybackStatus", RetryPolicy::Idempotent, || {
            self.request().get(path.clone()).send_json()
        })
        .await
    }

    async fn load_track(
        &self,
        group_id: &str,
        track_uri: &str,
        play_on_completion: bool,
    ) -> ControlResult<()> {
        let path = Self::load_path(group_id, "track", track_uri)?;
        log::info!("[Sonos] LoadTrack: group={}, uri={}", group_id, track_uri);
        let body = json!({ "playOnCompletion": play_on_completion });
        with_retry("LoadTrack", RetryPolicy::NotApplied, || {
            self.request().post(path.clone()).json(body.clone()).send()
        })
        .await?;
        Ok(())
    }

    async fn load_playlist(
        &self,
        group_id: &str,
        playlist_uri: &str,
        play_on_completion: bool,
    ) -> ControlResult<()> {
        let path = Self::load_path(group_id, "playlist", playlist_uri)?;
        log::info!(
            "[Sonos] LoadPlaylist: group={}, uri={}",
            group_id,
            playlist_uri
        );
        let body = json!({
            "playOnCompletion": play_on_completion,
            "playModes": { "shuffle": false, "repeat": false },
        });
        with_retry("LoadPlaylist", RetryPolicy::NotApplied, || {
            self.request().post(path.clone()).json(body.clone()).send()
        })
        .await?;
        Ok(())
    }

    async fn play(&self, group_id: &str) -> ControlResult<()> {
        log::info!("[Sonos] Sending Play command to group {}", group_id);
        let path = format!("/groups/{}/playback/play", group_id);
        with_retry("Play", RetryPolicy::Idempotent, || {
            self.request().post(path.clone()).send()
        })
        .await?;
        Ok(())
    }

    async fn pause(&self, group_id: &str) -> ControlResult<()> {
        log::info!("[Sonos] Sending Pause command to group {}", group_id);
        let path = format!("/groups/{}/playback/pause", group_id);
        with_retry("Pause", RetryPolicy::Idempotent, || {
            self.request().post(path.clone()).send()
        })
        .await?;
        Ok(())
    }
}
