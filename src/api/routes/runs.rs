//! Run inspection handlers.

use crate::api::AppState;
use crate::error::Error;
use crate::types::RunId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /runs/:id - Get a run with its status, payload and outcome
#[utoipa::path(
    get,
    path = "/runs/{id}",
    tag = "runs",
    params(
        ("id" = i64, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Run details", body = crate::types::ScheduledRun),
        (status = 404, description = "Run not found", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn get_run(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let id = RunId(id);
    match state.service.get_run(id).await {
        Ok(Some(run)) => (StatusCode::OK, Json(run)).into_response(),
        Ok(None) => Error::NotFound(format!("run {} not found", id)).into_response(),
        Err(e) => {
            tracing::error!(run_id = %id, error = %e, "Failed to get run");
            e.into_response()
        }
    }
}

/// GET /runs/:id/steps - List the step records of a run
#[utoipa::path(
    get,
    path = "/runs/{id}/steps",
    tag = "runs",
    params(
        ("id" = i64, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Step records in execution order", body = Vec<crate::types::StepRecord>),
        (status = 404, description = "Run not found", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn get_run_steps(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let id = RunId(id);
    match state.service.get_run(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Error::NotFound(format!("run {} not found", id)).into_response(),
        Err(e) => {
            tracing::error!(run_id = %id, error = %e, "Failed to get run");
            return e.into_response();
        }
    }

    match state.service.run_steps(id).await {
        Ok(steps) => (StatusCode::OK, Json(steps)).into_response(),
        Err(e) => {
            tracing::error!(run_id = %id, error = %e, "Failed to list step records");
            e.into_response()
        }
    }
}
