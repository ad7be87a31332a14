//! Boundary event intake.

use super::ScheduledResponse;
use crate::api::AppState;
use crate::types::EventEnvelope;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// POST /events - Accept a `newsletter.schedule` event
#[utoipa::path(
    post,
    path = "/events",
    tag = "events",
    request_body = crate::types::EventEnvelope,
    responses(
        (status = 201, description = "Run scheduled", body = ScheduledResponse),
        (status = 422, description = "Unknown event name or invalid payload", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn accept_event(
    State(state): State<AppState>,
    Json(envelope): Json<EventEnvelope>,
) -> Response {
    let trigger_at = envelope.data.scheduled_for;
    let user_id = envelope.data.user_id.clone();

    match state.service.scheduler().accept_envelope(envelope).await {
        Ok(run_id) => (
            StatusCode::CREATED,
            Json(ScheduledResponse { run_id, trigger_at }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Rejected schedule event");
            e.into_response()
        }
    }
}
