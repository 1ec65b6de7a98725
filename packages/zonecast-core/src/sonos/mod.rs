//! Sonos device platform access.
//!
//! # Module Structure
//!
//! - `types` - Domain types for groups and playback status
//! - `traits` - Trait abstractions for testability
//! - `client` - `SonosCloudClient` concrete trait implementation
//! - `control` - Low-level authenticated request transport and errors
//! - `retry` - Backoff for transient control API failures
//! - `webhook` - Event header parsing and signature verification

pub mod client;
pub mod control;
pub(crate) mod retry;
#[cfg(test)]
pub(crate) mod test_fixtures;
pub mod traits;
pub mod types;
pub mod webhook;

// Re-export trait abstractions
pub use traits::{SonosClient, SonosGroups, SonosPlayback};

// Re-export concrete implementation
pub use client::SonosCloudClient;
pub use control::{ControlError, ControlResult, StaticToken, TokenSource};
