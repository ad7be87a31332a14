//! Per-user handlers.

use super::{NewsletterHistoryQuery, ScheduledResponse};
use crate::api::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// POST /users/:id/reschedule - Schedule the user's next run from stored preferences
///
/// Called by the preferences UI after a save or a reactivation.
#[utoipa::path(
    post,
    path = "/users/{id}/reschedule",
    tag = "users",
    params(
        ("id" = String, Path, description = "User ID")
    ),
    responses(
        (status = 201, description = "Run scheduled", body = ScheduledResponse),
        (status = 404, description = "User has no preferences", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn reschedule_user(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    let run_id = match state.service.reschedule(&user_id).await {
        Ok(run_id) => run_id,
        Err(e) => return e.into_response(),
    };

    match state.service.get_run(run_id).await {
        Ok(Some(run)) => (
            StatusCode::CREATED,
            Json(ScheduledResponse {
                run_id,
                trigger_at: run.trigger_at,
            }),
        )
            .into_response(),
        Ok(None) => crate::error::Error::NotFound(format!("run {} not found", run_id)).into_response(),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Failed to load rescheduled run");
            e.into_response()
        }
    }
}

/// GET /users/:id/newsletters - Newsletters delivered to a user, newest first
#[utoipa::path(
    get,
    path = "/users/{id}/newsletters",
    tag = "users",
    params(
        ("id" = String, Path, description = "User ID"),
        ("limit" = Option<i64>, Query, description = "Maximum number of newsletters to return")
    ),
    responses(
        (status = 200, description = "Newsletter history", body = Vec<crate::types::NewsletterRecord>),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_user_newsletters(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<NewsletterHistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(20).clamp(1, 500);

    match state.service.newsletters(&user_id, limit).await {
        Ok(newsletters) => (StatusCode::OK, Json(newsletters)).into_response(),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Failed to list newsletters");
            e.into_response()
        }
    }
}
