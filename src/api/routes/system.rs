//! System handlers: health, OpenAPI, event stream.

use crate::api::AppState;
use crate::types::{Event, RunStatus};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// GET /health - Health check with queue depth
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Database unavailable")
    )
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db = &state.service.db;
    let counts = futures::future::try_join(
        db.count_runs_by_status(RunStatus::Pending),
        db.count_runs_by_status(RunStatus::Running),
    )
    .await;

    match counts {
        Ok((pending, running)) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "runs": {
                    "pending": pending,
                    "running": running
                }
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
    }
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}

/// SSE event name for a run event
fn event_name(event: &Event) -> &'static str {
    match event {
        Event::RunScheduled { .. } => "run_scheduled",
        Event::RunStarted { .. } => "run_started",
        Event::StepCompleted { .. } => "step_completed",
        Event::StepReplayed { .. } => "step_replayed",
        Event::StepAttemptFailed { .. } => "step_attempt_failed",
        Event::RunSucceeded { .. } => "run_succeeded",
        Event::RunSkipped { .. } => "run_skipped",
        Event::RunFailed { .. } => "run_failed",
        Event::ChainBroken { .. } => "chain_broken",
        Event::WebhookFailed { .. } => "webhook_failed",
        Event::Shutdown => "shutdown",
    }
}

/// GET /events - Server-sent events stream of run events
#[utoipa::path(
    get,
    path = "/events",
    tag = "events",
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let receiver = state.service.subscribe();
    let stream = BroadcastStream::new(receiver);

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json_data) => Some(Ok(SseEvent::default()
                .event(event_name(&event))
                .data(json_data))),
            Err(e) => {
                tracing::warn!("Failed to serialize event to JSON: {}", e);
                None
            }
        },
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("SSE client lagged, skipped {} events", skipped);
            Some(Ok(SseEvent::default().event("error").data(format!(
                r#"{{"error":"lagged","skipped":{}}}"#,
                skipped
            ))))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}
