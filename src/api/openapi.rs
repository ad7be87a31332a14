//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the newsletter-scheduler
//! REST API using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the newsletter-scheduler REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "newsletter-scheduler REST API",
        version = "0.1.0",
        description = "REST API for scheduling personalized newsletter runs and inspecting their durable step records",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Events
        crate::api::routes::accept_event,
        crate::api::routes::event_stream,

        // Runs
        crate::api::routes::get_run,
        crate::api::routes::get_run_steps,

        // Users
        crate::api::routes::reschedule_user,
        crate::api::routes::list_user_newsletters,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::RunId,
        crate::types::RunStatus,
        crate::types::StepStatus,
        crate::types::RunPayload,
        crate::types::ScheduleEvent,
        crate::types::EventEnvelope,
        crate::types::ScheduledRun,
        crate::types::StepRecord,
        crate::types::NewsletterRecord,
        crate::types::NewsletterResult,
        crate::types::Event,
        crate::frequency::Frequency,

        // API request/response types from routes
        crate::api::routes::ScheduledResponse,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "events", description = "Event intake - Accept schedule events and stream run events"),
        (name = "runs", description = "Runs - Inspect scheduled runs and their step records"),
        (name = "users", description = "Users - Reschedule a user's chain and list delivered newsletters"),
        (name = "system", description = "System endpoints - Health checks and the OpenAPI spec"),
    )
)]
pub struct ApiDoc;
