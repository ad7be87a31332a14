//! Durable job step engine
//!
//! A run is executed by handing a [`StepContext`] to a [`Pipeline`]. Each named step
//! is memoized in the `step_records` table, so re-executing a run (after a crash,
//! or when the same run is delivered twice) replays completed steps instead of
//! repeating their side effects.

mod context;

pub use context::StepContext;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::RetryConfig;
use crate::db::Database;
use crate::error::StepError;
use crate::types::{Event, RunId, RunStatus, ScheduledRun};
use crate::{Error, Result};

/// A multi-step job executed against one scheduled run
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Value stored as the run's result when the pipeline succeeds
    type Output: Serialize + DeserializeOwned + Send + Sync;

    /// Pipeline name for logs
    fn name(&self) -> &str;

    /// Execute the pipeline's steps through `ctx`
    async fn run(
        &self,
        run: &ScheduledRun,
        ctx: &mut StepContext,
    ) -> std::result::Result<Self::Output, StepError>;
}

/// Outcome of executing a run
#[derive(Clone, Debug)]
pub struct RunReport<T> {
    /// Run that was executed
    pub run_id: RunId,
    /// Owner of the run
    pub user_id: String,
    /// Terminal status reached
    pub status: RunStatus,
    /// Pipeline output, present for succeeded runs
    pub output: Option<T>,
    /// Failure message, or the skip reason for skipped runs
    pub error: Option<String>,
    /// Step that failed the run
    pub failed_step: Option<String>,
}

impl<T: DeserializeOwned> RunReport<T> {
    fn from_stored(run: ScheduledRun) -> Self {
        let output = run
            .result
            .and_then(|value| serde_json::from_value(value).ok());
        Self {
            run_id: run.id,
            user_id: run.user_id,
            status: run.status,
            output,
            error: run.error,
            failed_step: run.failed_step,
        }
    }
}

/// Executes runs step by step, recording progress in the database
#[derive(Clone)]
pub struct StepEngine {
    db: Arc<Database>,
    retry: RetryConfig,
    event_tx: broadcast::Sender<Event>,
}

impl StepEngine {
    /// Create an engine over `db` that publishes progress on `event_tx`
    pub fn new(db: Arc<Database>, retry: RetryConfig, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            db,
            retry,
            event_tx,
        }
    }

    /// Execute (or resume) a run
    ///
    /// A run that already reached a terminal status is not executed again; its stored
    /// outcome is returned. A pipeline failure is reported through the returned
    /// [`RunReport`] with status [`RunStatus::Failed`]. `Err` is returned only when
    /// the run cannot be executed at all.
    pub async fn execute<P: Pipeline>(&self, run_id: RunId, pipeline: &P) -> Result<RunReport<P::Output>> {
        let run = self
            .db
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run {} not found", run_id)))?;

        if run.status.is_terminal() {
            tracing::debug!(run_id = %run_id, status = ?run.status, "Run already finished, not executing");
            return Ok(RunReport::from_stored(run));
        }

        let now = Utc::now();
        if run.trigger_at > now {
            return Err(Error::RunNotDue {
                run_id: run_id.0,
                trigger_at: run.trigger_at.timestamp(),
            });
        }

        if !self.db.start_run(run_id, now).await? {
            let current = self
                .db
                .get_run(run_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("run {} not found", run_id)))?;
            return Ok(RunReport::from_stored(current));
        }

        tracing::info!(run_id = %run_id, user_id = %run.user_id, pipeline = pipeline.name(), "Executing run");
        self.emit_event(Event::RunStarted {
            run_id,
            user_id: run.user_id.clone(),
        });

        let mut ctx = StepContext::new(run_id, Arc::clone(&self.db), self.retry.clone(), self.event_tx.clone());
        let outcome = pipeline.run(&run, &mut ctx).await;

        let mut report = RunReport {
            run_id,
            user_id: run.user_id.clone(),
            status: RunStatus::Failed,
            output: None,
            error: None,
            failed_step: None,
        };

        match outcome {
            Ok(output) => {
                let value = serde_json::to_value(&output)?;
                self.db
                    .finish_run_succeeded(run_id, &value)
                    .await
                    .inspect_err(|e| tracing::error!(run_id = %run_id, error = %e, "Failed to record run outcome"))?;
                tracing::info!(run_id = %run_id, user_id = %run.user_id, "Run succeeded");
                self.emit_event(Event::RunSucceeded {
                    run_id,
                    user_id: run.user_id.clone(),
                });
                report.status = RunStatus::Succeeded;
                report.output = Some(output);
            }
            Err(StepError::Skip { reason }) => {
                self.db
                    .finish_run_skipped(run_id, &reason)
                    .await
                    .inspect_err(|e| tracing::error!(run_id = %run_id, error = %e, "Failed to record run outcome"))?;
                tracing::info!(run_id = %run_id, user_id = %run.user_id, reason = %reason, "Run skipped");
                self.emit_event(Event::RunSkipped {
                    run_id,
                    user_id: run.user_id.clone(),
                    reason: reason.clone(),
                });
                report.status = RunStatus::Skipped;
                report.error = Some(reason);
            }
            Err(e) => {
                let message = e.to_string();
                let failed_step = ctx.failed_step().map(str::to_string);
                self.db
                    .finish_run_failed(run_id, failed_step.as_deref(), &message)
                    .await
                    .inspect_err(|e| tracing::error!(run_id = %run_id, error = %e, "Failed to record run outcome"))?;
                tracing::error!(
                    run_id = %run_id,
                    user_id = %run.user_id,
                    step = ?failed_step,
                    error = %message,
                    "Run failed"
                );
                self.emit_event(Event::RunFailed {
                    run_id,
                    user_id: run.user_id.clone(),
                    step: failed_step.clone(),
                    error: message.clone(),
                });
                report.error = Some(message);
                report.failed_step = failed_step;
            }
        }

        Ok(report)
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Database the engine records progress in
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Event sender shared with the engine
    pub fn event_sender(&self) -> &broadcast::Sender<Event> {
        &self.event_tx
    }

    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
