//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`events`] - Boundary event intake
//! - [`runs`] - Run and step inspection
//! - [`users`] - Per-user rescheduling and newsletter history
//! - [`system`] - Health, event stream, OpenAPI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RunId;

mod events;
mod runs;
mod system;
mod users;

// Re-export all handlers so `routes::function_name` works
pub use events::*;
pub use runs::*;
pub use system::*;
pub use users::*;

// ============================================================================
// Query/Response Types (shared across handlers)
// ============================================================================

/// Response for endpoints that enqueue a run
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ScheduledResponse {
    /// ID of the new run
    pub run_id: RunId,
    /// The run will not execute before this time
    pub trigger_at: DateTime<Utc>,
}

/// Query parameters for GET /users/:id/newsletters
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct NewsletterHistoryQuery {
    /// Maximum number of newsletters to return (default: 20)
    pub limit: Option<i64>,
}
