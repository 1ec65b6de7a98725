//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the Sonos control API and its webhook contract.
//! Changing them would break compatibility with the platform.

// ─────────────────────────────────────────────────────────────────────────────
// Sonos Control API
// ─────────────────────────────────────────────────────────────────────────────

/// Base URL of the Sonos cloud control API.
pub const SONOS_CONTROL_API_BASE: &str = "https://api.ws.sonos.com/control/api/v1";

/// Wire value reported while a group has nothing loaded.
pub const PLAYBACK_STATE_IDLE: &str = "PLAYBACK_STATE_IDLE";

/// Wire value reported while a group is paused.
pub const PLAYBACK_STATE_PAUSED: &str = "PLAYBACK_STATE_PAUSED";

/// Wire value reported while a group is playing.
pub const PLAYBACK_STATE_PLAYING: &str = "PLAYBACK_STATE_PLAYING";

/// Wire value reported while a group is buffering content.
pub const PLAYBACK_STATE_BUFFERING: &str = "PLAYBACK_STATE_BUFFERING";

/// Timeout for a single control API request (seconds).
pub const CONTROL_TIMEOUT_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Webhook Ingress
// ─────────────────────────────────────────────────────────────────────────────

/// Header carrying the event sequence id.
pub const HEADER_SEQ_ID: &str = "x-sonos-event-seq-id";

/// Header carrying the event namespace (e.g. `playbackStatus`).
pub const HEADER_NAMESPACE: &str = "x-sonos-namespace";

/// Header carrying the event type.
pub const HEADER_TYPE: &str = "x-sonos-type";

/// Header carrying the target type (e.g. `groupId`).
pub const HEADER_TARGET_TYPE: &str = "x-sonos-target-type";

/// Header carrying the target value (the group id for playback events).
pub const HEADER_TARGET_VALUE: &str = "x-sonos-target-value";

/// Header carrying the base64url SHA-256 signature.
pub const HEADER_SIGNATURE: &str = "x-sonos-event-signature";

/// Header carrying the household the event belongs to.
pub const HEADER_HOUSEHOLD_ID: &str = "x-sonos-household-id";

/// Namespace of playback status events (playing, paused, idle).
pub const NAMESPACE_PLAYBACK_STATUS: &str = "playbackStatus";

/// Namespace of playback events (track changed, queue updated).
pub const NAMESPACE_PLAYBACK: &str = "playback";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "zonecast";
