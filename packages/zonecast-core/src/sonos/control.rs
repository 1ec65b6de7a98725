//! Low-level transport for the Sonos cloud control API.
//!
//! This module handles authenticated JSON requests, timeouts, and mapping of
//! HTTP failures onto [`ControlError`]. For high-level commands, see `client.rs`.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur while talking to the device platform.
#[derive(Debug, Error)]
pub enum ControlError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Platform returned a non-success status.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Access token was rejected or is missing.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request did not complete within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Content URI is not of the form `service:kind:id`.
    #[error("Invalid content URI: {0}")]
    InvalidUri(String),

    /// Response body could not be decoded.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Convenient Result alias for device platform operations.
pub type ControlResult<T> = Result<T, ControlError>;

impl ControlError {
    /// Returns true if this error is transient and the operation should be retried.
    ///
    /// Timeouts, connection failures, rate limiting (429) and server-side (5xx)
    /// failures are transient. Client errors are not: retrying them would only
    /// repeat the same rejection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ControlError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ControlError::HttpStatus(code, _) => *code == 429 || *code >= 500,
            ControlError::Timeout(_) => true,
            ControlError::Unauthorized(_) | ControlError::InvalidUri(_) | ControlError::Parse(_) => {
                false
            }
        }
    }

    /// Returns true if the platform certainly did not act on the request.
    ///
    /// Only a refused connection or a 429 proves that. A timeout or a 5xx may
    /// arrive after the command already took effect.
    #[must_use]
    pub fn was_not_applied(&self) -> bool {
        match self {
            ControlError::Http(e) => e.is_connect(),
            ControlError::HttpStatus(code, _) => *code == 429,
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Source
// ─────────────────────────────────────────────────────────────────────────────

/// Supplies bearer tokens for control API requests.
///
/// Token acquisition and refresh live outside this crate; implementations
/// return whatever token is currently valid.
pub trait TokenSource: Send + Sync {
    /// Returns the current access token, if one is available.
    fn access_token(&self) -> Option<String>;
}

/// Token source backed by a fixed, externally managed token.
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Creates a token source from an optional token string.
    ///
    /// Empty strings are treated as "no token".
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }
}

impl TokenSource for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for constructing and sending control API requests.
///
/// # Example
/// ```ignore
/// let status: PlaybackStatus = ControlRequestBuilder::new(&client, base, token)
///     .get(&format!("/groups/{}/playback", group_id))
///     .send_json()
///     .await?;
/// ```
pub struct ControlRequestBuilder<'a> {
    client: &'a Client,
    base_url: &'a str,
    token: Option<String>,
    method: Method,
    path: String,
    body: Option<Value>,
    timeout: Duration,
}

impl<'a> ControlRequestBuilder<'a> {
    /// Creates a new request builder against `base_url`.
    #[must_use]
    pub fn new(client: &'a Client, base_url: &'a str, token: Option<String>) -> Self {
        Self {
            client,
            base_url,
            token,
            method: Method::GET,
            path: String::new(),
            body: None,
            timeout: Duration::from_secs(crate::protocol_constants::CONTROL_TIMEOUT_SECS),
        }
    }

    /// Targets `path` with a GET request.
    #[must_use]
    pub fn get(mut self, path: impl Into<String>) -> Self {
        self.method = Method::GET;
        self.path = path.into();
        self
    }

    /// Targets `path` with a POST request.
    #[must_use]
    pub fn post(mut self, path: impl Into<String>) -> Self {
        self.method = Method::POST;
        self.path = path.into();
        self
    }

    /// Attaches a JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Overrides the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL this request targets.
    fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }

    /// Sends the request and returns the raw response body.
    ///
    /// # Errors
    /// Returns `ControlError::Unauthorized` when no token is available or the
    /// platform answers 401/403, `Timeout` when the deadline passes, and
    /// `HttpStatus` for any other non-success status.
    pub async fn send(self) -> ControlResult<String> {
        let url = self.url();
        let token = self
            .token
            .clone()
            .ok_or_else(|| ControlError::Unauthorized("no access token available".into()))?;

        log::debug!("[Sonos] {} {}", self.method, url);

        let mut request = self
            .client
            .request(self.method.clone(), &url)
            .bearer_auth(token)
            .timeout(self.timeout);
        if let Some(body) = &self.body {
            request = request.json(body);
        }

        let start = std::time::Instant::now();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ControlError::Timeout(self.timeout)),
            Err(e) => return Err(ControlError::Http(e)),
        };
        let status = response.status();
        let text = response.text().await?;

        log::debug!(
            "[Sonos] {} {} completed in {:?}: {}",
            self.method,
            url,
            start.elapsed(),
            status
        );

        check_status(status, text)
    }

    /// Sends the request and decodes the JSON response body.
    pub async fn send_json<T: DeserializeOwned>(self) -> ControlResult<T> {
        let text = self.send().await?;
        serde_json::from_str(&text).map_err(|e| ControlError::Parse(e.to_string()))
    }

    /// Returns the request parts without sending (for testing).
    #[cfg(test)]
    pub fn into_parts(self) -> (Method, String, Option<Value>) {
        let url = self.url();
        (self.method, url, self.body)
    }
}

/// Maps a response status onto success or the matching [`ControlError`].
fn check_status(status: StatusCode, body: String) -> ControlResult<String> {
    if status.is_success() {
        return Ok(body);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ControlError::Unauthorized(body));
    }
    Err(ControlError::HttpStatus(status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_joins_base_and_path() {
        let client = Client::new();
        let (method, url, body) =
            ControlRequestBuilder::new(&client, "https://api.example.com/v1/", None)
                .post("/groups/G1/playback/pause")
                .into_parts();
        assert_eq!(method, Method::POST);
        assert_eq!(url, "https://api.example.com/v1/groups/G1/playback/pause");
        assert!(body.is_none());
    }

    #[test]
    fn builder_captures_json_body() {
        let client = Client::new();
        let (_, _, body) = ControlRequestBuilder::new(&client, "https://x", None)
            .post("/p")
            .json(json!({ "playOnCompletion": true }))
            .into_parts();
        assert_eq!(body, Some(json!({ "playOnCompletion": true })));
    }

    #[tokio::test]
    async fn send_without_token_is_unauthorized() {
        let client = Client::new();
        let err = ControlRequestBuilder::new(&client, "http://127.0.0.1:9", None)
            .get("/households")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Unauthorized(_)));
    }

    #[test]
    fn status_mapping() {
        assert!(check_status(StatusCode::OK, "{}".into()).is_ok());
        assert!(matches!(
            check_status(StatusCode::UNAUTHORIZED, String::new()),
            Err(ControlError::Unauthorized(_))
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, String::new()),
            Err(ControlError::HttpStatus(502, _))
        ));
    }

    #[test]
    fn transient_classification() {
        assert!(ControlError::HttpStatus(503, String::new()).is_transient());
        assert!(ControlError::HttpStatus(429, String::new()).is_transient());
        assert!(ControlError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ControlError::HttpStatus(404, String::new()).is_transient());
        assert!(!ControlError::InvalidUri("x".into()).is_transient());
        assert!(!ControlError::Unauthorized(String::new()).is_transient());
    }

    #[test]
    fn only_rate_limit_proves_a_command_was_not_applied() {
        assert!(ControlError::HttpStatus(429, String::new()).was_not_applied());
        assert!(!ControlError::HttpStatus(503, String::new()).was_not_applied());
        assert!(!ControlError::Timeout(Duration::from_secs(1)).was_not_applied());
        assert!(!ControlError::HttpStatus(404, String::new()).was_not_applied());
    }

    #[tokio::test]
    async fn refused_connection_was_not_applied() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let base = format!("http://127.0.0.1:{port}");
        let client = Client::new();
        let err = ControlRequestBuilder::new(&client, &base, Some("t".into()))
            .post("/groups/G1/playback/play")
            .send()
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(err.was_not_applied());
    }

    #[test]
    fn static_token_treats_blank_as_missing() {
        assert_eq!(StaticToken::new(Some("  ".into())).access_token(), None);
        assert_eq!(
            StaticToken::new(Some("abc".into())).access_token().as_deref(),
            Some("abc")
        );
    }
}
