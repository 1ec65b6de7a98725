//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_ok, api_success};
use crate::api::AppState;
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{ZonecastError, ZonecastResult};
use crate::protocol_constants::SERVICE_ID;
use crate::runtime::TaskSpawner;
use crate::services::TickKind;
use crate::sonos::webhook::{constant_time_eq, WebhookEvent};

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/cron/process-queue",
            get(process_queue).post(process_queue),
        )
        .route(
            "/api/cron/check-schedules",
            get(check_schedules).post(check_schedules),
        )
        .route("/api/admin/refresh-groups", post(refresh_groups))
        .route(
            "/sonos/webhook",
            get(webhook_ready).post(handle_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization
// ─────────────────────────────────────────────────────────────────────────────

/// Checks `Authorization: Bearer <trigger_secret>` when a secret is configured.
fn authorize(state: &AppState, headers: &HeaderMap) -> ZonecastResult<()> {
    let Some(secret) = state.config.trigger_secret.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(());
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
        Some(_) => {
            log::warn!("[Server] Rejected trigger with wrong bearer token");
            Err(ZonecastError::Unauthorized("invalid bearer token".into()))
        }
        None => Err(ZonecastError::Unauthorized("missing bearer token".into())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness check.
async fn health_check() -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
    }))
}

/// One queue tick over every zone.
async fn process_queue(State(state): State<AppState>, headers: HeaderMap) -> ZonecastResult<Response> {
    authorize(&state, &headers)?;
    let summary = state.driver.run(TickKind::Queue).await?;
    Ok(api_success(summary).into_response())
}

/// One schedule promotion tick over every zone.
async fn check_schedules(State(state): State<AppState>, headers: HeaderMap) -> ZonecastResult<Response> {
    authorize(&state, &headers)?;
    let summary = state.driver.run(TickKind::Schedules).await?;
    Ok(api_success(summary).into_response())
}

/// Re-resolves every zone's group, ignoring cached ids.
async fn refresh_groups(State(state): State<AppState>, headers: HeaderMap) -> ZonecastResult<Response> {
    authorize(&state, &headers)?;
    let results = state.driver.refresh_groups().await?;
    Ok(api_success(results).into_response())
}

/// Readiness check for the webhook endpoint.
async fn webhook_ready() -> impl IntoResponse {
    api_success(json!({ "status": "ready" }))
}

/// Webhook ingress.
///
/// Always answers 200 so the platform does not retry. Valid playback events
/// refresh the matching zone's `last_updated` in a detached task; they never
/// drive the queue.
async fn handle_webhook(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let event = WebhookEvent::from_headers(&headers);
    let (client_id, client_secret) = state.config.webhook_credentials().unwrap_or(("", ""));

    if !event.verify(client_id, client_secret) {
        log::warn!(
            "[Webhook] Invalid signature (namespace={}, target={})",
            event.namespace,
            event.target_value
        );
        return (
            StatusCode::OK,
            Json(json!({ "success": false, "error": "Invalid signature" })),
        )
            .into_response();
    }

    log::debug!(
        "[Webhook] Event seq={} namespace={} type={} target={} household={}",
        event.seq_id,
        event.namespace,
        event.event_type,
        event.target_value,
        event.household_id
    );

    if event.touches_playback() {
        let db = state.db.clone();
        let clock = Arc::clone(&state.clock);
        state.spawner.spawn(async move {
            touch_zone_for_group(&db, clock.as_ref(), &event.target_value).await;
        });
    }

    api_ok().into_response()
}

/// Refreshes `last_updated` of the zone cached against `group_id`.
async fn touch_zone_for_group(db: &Database, clock: &dyn Clock, group_id: &str) {
    let zone = match db.find_zone_by_group_id(group_id).await {
        Ok(Some(zone)) => zone,
        Ok(None) => {
            log::warn!("[Webhook] No zone cached for group {}", group_id);
            return;
        }
        Err(e) => {
            log::warn!("[Webhook] Zone lookup for group {} failed: {}", group_id, e);
            return;
        }
    };

    match db.touch_playback_state(&zone.id, clock.now()).await {
        Ok(true) => log::debug!("[Webhook] Touched playback state of zone {}", zone.name),
        Ok(false) => log::warn!("[Webhook] Zone {} has no playback state", zone.name),
        Err(e) => log::warn!("[Webhook] Touch for zone {} failed: {}", zone.name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::test_support::seeded;
    use crate::protocol_constants::{
        HEADER_NAMESPACE, HEADER_SEQ_ID, HEADER_SIGNATURE, HEADER_TARGET_TYPE, HEADER_TARGET_VALUE,
        HEADER_TYPE,
    };
    use crate::runtime::TokioSpawner;
    use crate::services::{
        GroupResolver, QueueProcessor, ScheduleEvaluator, SchedulePromoter, TickDriver, ZoneLocks,
    };
    use crate::sonos::test_fixtures::{group, MockSonos};
    use crate::state::Config;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use tower::ServiceExt;

    const GROUP: &str = "RINCON_A:1";

    async fn app(config: Config) -> (Router, Database, Arc<FixedClock>) {
        let db = seeded().await;
        let sonos = Arc::new(MockSonos::new(vec![group(GROUP, &["RINCON_A", "RINCON_B"])]));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
        ));
        let resolver = Arc::new(GroupResolver::new(db.clone(), sonos.clone(), clock.clone(), 30));
        let evaluator = Arc::new(ScheduleEvaluator::new(db.clone(), clock.clone()));
        let zone_locks = ZoneLocks::arc();
        let processor = Arc::new(QueueProcessor::new(
            db.clone(),
            sonos.clone(),
            resolver.clone(),
            evaluator.clone(),
            clock.clone(),
            zone_locks.clone(),
            Duration::ZERO,
        ));
        let promoter = Arc::new(SchedulePromoter::new(
            db.clone(),
            sonos,
            resolver.clone(),
            evaluator,
            clock.clone(),
            zone_locks.clone(),
        ));
        let driver = Arc::new(TickDriver::new(
            db.clone(),
            processor,
            promoter,
            resolver,
            Duration::from_secs(5),
            1,
        ));
        let state = AppState::builder()
            .db(db.clone())
            .driver(driver)
            .clock(clock.clone())
            .spawner(TokioSpawner::current())
            .config(Arc::new(config))
            .build()
            .unwrap();
        (create_router(state), db, clock)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn signed_event(namespace: &str, target: &str) -> WebhookEvent {
        let mut event = WebhookEvent {
            seq_id: "7".into(),
            namespace: namespace.into(),
            event_type: namespace.into(),
            target_type: "groupId".into(),
            target_value: target.into(),
            signature: String::new(),
            household_id: "HH".into(),
        };
        event.signature = event.expected_signature("client", "secret");
        event
    }

    fn webhook_request(event: &WebhookEvent) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/sonos/webhook")
            .header(HEADER_SEQ_ID, &event.seq_id)
            .header(HEADER_NAMESPACE, &event.namespace)
            .header(HEADER_TYPE, &event.event_type)
            .header(HEADER_TARGET_TYPE, &event.target_type)
            .header(HEADER_TARGET_VALUE, &event.target_value)
            .header(HEADER_SIGNATURE, &event.signature)
            .body(Body::from("{}"))
            .unwrap()
    }

    fn webhook_config() -> Config {
        Config {
            sonos_client_id: Some("client".into()),
            sonos_client_secret: Some("secret".into()),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _, _) = app(Config::default()).await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["service"], SERVICE_ID);
    }

    #[tokio::test]
    async fn trigger_runs_tick_and_returns_summary() {
        let (app, _, _) = app(Config::default()).await;
        let response = app
            .oneshot(
                Request::post("/api/cron/process-queue")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["zones"], 1);
        assert_eq!(json["data"]["succeeded"], 1);
    }

    #[tokio::test]
    async fn trigger_requires_secret_when_configured() {
        let config = Config {
            trigger_secret: Some("s3cret".into()),
            ..Config::default()
        };
        let (app, _, _) = app(config).await;

        let denied = app
            .clone()
            .oneshot(
                Request::get("/api/cron/check-schedules")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(denied).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "unauthorized");

        let allowed = app
            .oneshot(
                Request::get("/api/cron/check-schedules")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn trigger_rejects_near_miss_tokens() {
        let config = Config {
            trigger_secret: Some("s3cret".into()),
            ..Config::default()
        };
        let (app, _, _) = app(config).await;

        for presented in ["Bearer s3cre", "Bearer s3cretX", "Bearer S3CRET", "s3cret"] {
            let response = app
                .clone()
                .oneshot(
                    Request::post("/api/cron/process-queue")
                        .header(header::AUTHORIZATION, presented)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{presented}");
        }
    }

    #[tokio::test]
    async fn invalid_webhook_signature_still_gets_200() {
        let (app, _, _) = app(webhook_config()).await;
        let mut event = signed_event("playbackStatus", GROUP);
        event.signature = "forged".into();

        let response = app.oneshot(webhook_request(&event)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn valid_playback_event_touches_zone() {
        let (app, db, clock) = app(webhook_config()).await;
        db.update_group_cache("z1", GROUP, clock.now()).await.unwrap();
        clock.advance(chrono::Duration::minutes(5));
        let response = app
            .oneshot(webhook_request(&signed_event("playbackStatus", GROUP)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);

        // The touch runs detached; poll briefly for it.
        let mut touched = false;
        for _ in 0..50 {
            let state = db.playback_state("z1", clock.now()).await.unwrap();
            if state.last_updated == clock.now() {
                touched = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(touched);
    }

    #[tokio::test]
    async fn webhook_get_reports_ready() {
        let (app, _, _) = app(Config::default()).await;
        let response = app
            .oneshot(Request::get("/sonos/webhook").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["status"], "ready");
    }
}
