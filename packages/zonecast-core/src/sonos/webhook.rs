//! Webhook event parsing and signature verification.
//!
//! Sonos signs each event as
//! `base64url(sha256(seqId ‖ namespace ‖ type ‖ targetType ‖ targetValue ‖ clientId ‖ clientSecret))`,
//! unpadded. Events are informational only: they never drive the queue.

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::protocol_constants::{
    HEADER_HOUSEHOLD_ID, HEADER_NAMESPACE, HEADER_SEQ_ID, HEADER_SIGNATURE, HEADER_TARGET_TYPE,
    HEADER_TARGET_VALUE, HEADER_TYPE, NAMESPACE_PLAYBACK, NAMESPACE_PLAYBACK_STATUS,
};

/// Headers of one inbound webhook event. Missing headers read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookEvent {
    pub seq_id: String,
    pub namespace: String,
    pub event_type: String,
    pub target_type: String,
    pub target_value: String,
    pub signature: String,
    pub household_id: String,
}

impl WebhookEvent {
    /// Extracts the event headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            seq_id: get(HEADER_SEQ_ID),
            namespace: get(HEADER_NAMESPACE),
            event_type: get(HEADER_TYPE),
            target_type: get(HEADER_TARGET_TYPE),
            target_value: get(HEADER_TARGET_VALUE),
            signature: get(HEADER_SIGNATURE),
            household_id: get(HEADER_HOUSEHOLD_ID),
        }
    }

    /// Computes the signature Sonos would send for this event.
    #[must_use]
    pub fn expected_signature(&self, client_id: &str, client_secret: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [
            &self.seq_id,
            &self.namespace,
            &self.event_type,
            &self.target_type,
            &self.target_value,
        ] {
            hasher.update(part.as_bytes());
        }
        hasher.update(client_id.as_bytes());
        hasher.update(client_secret.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Returns true if the event carries a valid signature.
    #[must_use]
    pub fn verify(&self, client_id: &str, client_secret: &str) -> bool {
        if self.signature.is_empty() {
            return false;
        }
        let expected = self.expected_signature(client_id, client_secret);
        constant_time_eq(expected.as_bytes(), self.signature.as_bytes())
    }

    /// Returns true for namespaces that refresh persisted playback state.
    #[must_use]
    pub fn touches_playback(&self) -> bool {
        self.namespace == NAMESPACE_PLAYBACK_STATUS || self.namespace == NAMESPACE_PLAYBACK
    }
}

/// Compares secrets without short-circuiting on the first differing byte.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
