//! # newsletter-scheduler
//!
//! Durable scheduler and pipeline for personalized news digests.
//!
//! A `newsletter.schedule` event becomes a persisted run. When the run is due, the
//! dispatcher executes a five-step pipeline (liveness check, article fetch,
//! summarization, email delivery, next-run scheduling). Every step's result is
//! recorded, so a run interrupted by a crash resumes without repeating side
//! effects, and each successful delivery schedules the user's next run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use newsletter_scheduler::{Config, NewsletterService, ScheduleEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = NewsletterService::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     service
//!         .schedule(ScheduleEvent {
//!             user_id: "user-1".to_string(),
//!             email: "reader@example.com".to_string(),
//!             categories: vec!["technology".to_string()],
//!             frequency: Default::default(),
//!             scheduled_for: chrono::Utc::now(),
//!             is_test: false,
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Durable step execution
pub mod engine;
/// Error types
pub mod error;
/// Delivery cadence and next-run calculation
pub mod frequency;
/// The five-step newsletter pipeline
pub mod newsletter;
/// HTTP collaborators: article source, summarizer, email delivery
pub mod providers;
/// Retry logic with exponential backoff
pub mod retry;
/// Run scheduling and event intake
pub mod scheduler;
/// Due-run dispatcher
pub mod scheduler_task;
/// Service facade wiring the pipeline together
pub mod service;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use engine::{Pipeline, RunReport, StepContext, StepEngine};
pub use error::{ApiError, DatabaseError, DeliveryError, Error, ErrorDetail, Result, StepError, ToHttpStatus};
pub use frequency::{Frequency, next_trigger};
pub use newsletter::NewsletterPipeline;
pub use providers::{ArticleSource, DeliveryChannel, PreferenceStore, Summarizer};
pub use scheduler::{RunScheduler, Scheduler};
pub use service::{Collaborators, NewsletterService};
pub use types::{
    Article, Event, EventEnvelope, NewsletterRecord, NewsletterResult, PreferenceSnapshot, RunId,
    RunPayload, RunStatus, ScheduleEvent, ScheduledRun, StepRecord, StepStatus,
};

/// Helper function to run the service with graceful signal handling.
///
/// Waits for a termination signal and then calls the service's `shutdown()` method,
/// which stops the dispatcher and lets in-flight runs finish.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use newsletter_scheduler::{Config, NewsletterService, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = NewsletterService::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(service).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: NewsletterService) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
