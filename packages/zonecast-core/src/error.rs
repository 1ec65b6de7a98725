//! Centralized error types for the Zonecast core library.
//!
//! This module provides a unified error handling system that:
//! - Gives every subsystem error a machine-readable code
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::db::StoreError;
use crate::services::{ResolutionError, TickError};
use crate::sonos::ControlError;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for ControlError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Unauthorized(_) => "device_unauthorized",
            Self::Timeout(_) => "device_timeout",
            Self::InvalidUri(_) => "invalid_content_uri",
            Self::Parse(_) => "device_parse_error",
        }
    }
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::Corrupt(_) => "corrupt_record",
            Self::Invalid(_) => "invalid_value",
        }
    }
}

impl ErrorCode for ResolutionError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoDeviceConfig(_) => "no_device_config",
            Self::NoDevicesOnline(_) => "no_devices_online",
            Self::Platform(e) => e.code(),
            Self::Store(e) => e.code(),
        }
    }
}

impl ErrorCode for TickError {
    fn code(&self) -> &'static str {
        match self {
            Self::Resolution(e) => e.code(),
            Self::Device(e) => e.code(),
            Self::Data(e) => e.code(),
            Self::TimedOut(_) => "zone_timed_out",
        }
    }
}

/// Application-wide error type for the Zonecast server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum ZonecastError {
    /// Device platform call failed.
    #[error("Device platform error: {0}")]
    Device(String),

    /// A zone could not be mapped onto a live group.
    #[error("Group resolution failed: {0}")]
    Resolution(String),

    /// Persistence layer failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or wrong trigger secret.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Server configuration error (missing or invalid settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ZonecastError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Device(_) => "device_error",
            Self::Resolution(_) => "resolution_failed",
            Self::Database(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Device(_) | Self::Resolution(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

// Re-export Result type aliases from their defining modules
pub use crate::db::StoreResult;
pub use crate::services::{ResolutionResult, TickResult};
pub use crate::sonos::ControlResult;

/// Convenient Result alias for application-wide operations.
pub type ZonecastResult<T> = Result<T, ZonecastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for ZonecastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ControlError> for ZonecastError {
    fn from(err: ControlError) -> Self {
        Self::Device(err.to_string())
    }
}

impl From<StoreError> for ZonecastError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Invalid(what) => Self::InvalidRequest(what),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<ResolutionError> for ZonecastError {
    fn from(err: ResolutionError) -> Self {
        match err {
            ResolutionError::Store(e) => e.into(),
            other => Self::Resolution(other.to_string()),
        }
    }
}
