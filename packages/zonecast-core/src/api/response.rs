//! Response envelopes shared by the HTTP handlers.
//!
//! Success bodies are `{ "success": true, "data": ... }`. Failures go through
//! [`ZonecastError`](crate::error::ZonecastError)'s `IntoResponse`.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

/// 200 with `data` wrapped in the success envelope.
pub fn api_success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "success": true, "data": data })))
}

/// 200 with an empty success envelope.
pub fn api_ok() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "success": true })))
}
