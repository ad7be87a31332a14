//! Dispatcher that executes due runs
//!
//! The dispatcher polls `scheduled_runs` every `poll_interval`, atomically claims the
//! runs whose trigger time has passed and executes each one on its own tokio task.
//! A semaphore of `max_concurrent_runs` permits bounds how many runs execute at once;
//! runs beyond that stay `pending` until a permit frees up.
//!
//! # Example
//!
//! ```no_run
//! use newsletter_scheduler::engine::{Pipeline, StepEngine};
//! use newsletter_scheduler::config::SchedulerConfig;
//! use newsletter_scheduler::scheduler_task::SchedulerTask;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example<P: Pipeline + 'static>(engine: StepEngine, pipeline: Arc<P>) {
//! let cancel = CancellationToken::new();
//! let task = SchedulerTask::new(engine, pipeline, SchedulerConfig::default(), cancel.clone());
//!
//! let handle = tokio::spawn(task.run());
//! // ...
//! cancel.cancel();
//! let drained = handle.await.unwrap_or(false);
//! # }
//! ```

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::SchedulerConfig;
use crate::engine::{Pipeline, StepEngine};

/// Background task that claims due runs and hands them to the engine
pub struct SchedulerTask<P> {
    engine: StepEngine,
    pipeline: Arc<P>,
    config: SchedulerConfig,
    permits: u32,
    concurrent_limit: Arc<Semaphore>,
    cancel_token: CancellationToken,
}

impl<P: Pipeline + 'static> SchedulerTask<P> {
    /// Create a dispatcher; it stops once `cancel_token` is cancelled
    pub fn new(
        engine: StepEngine,
        pipeline: Arc<P>,
        config: SchedulerConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        let permits = u32::try_from(config.max_concurrent_runs.max(1)).unwrap_or(u32::MAX);
        Self {
            engine,
            pipeline,
            concurrent_limit: Arc::new(Semaphore::new(permits as usize)),
            permits,
            config,
            cancel_token,
        }
    }

    /// Number of runs currently executing
    pub fn in_flight(&self) -> usize {
        (self.permits as usize).saturating_sub(self.concurrent_limit.available_permits())
    }

    /// Claim due runs up to the free capacity and spawn their execution
    ///
    /// Returns how many runs were dispatched.
    pub async fn tick(&self) -> Result<usize> {
        let capacity = self.concurrent_limit.available_permits();
        if capacity == 0 {
            debug!("All run slots busy, not claiming");
            return Ok(0);
        }

        let runs = self.engine.db().claim_due_runs(Utc::now(), capacity).await?;
        let mut dispatched = 0;

        for run in runs {
            // Only this task acquires permits, so the capacity checked above is still free
            let permit = match Arc::clone(&self.concurrent_limit).acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    warn!(run_id = %run.id, "Run slots closed, leaving claimed run for recovery");
                    break;
                }
            };

            let engine = self.engine.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let run_id = run.id;
            debug!(run_id = %run_id, user_id = %run.user_id, trigger_at = %run.trigger_at, "Dispatching run");

            tokio::spawn(async move {
                let _permit = permit;
                match engine.execute(run_id, pipeline.as_ref()).await {
                    Ok(report) => {
                        debug!(run_id = %run_id, status = ?report.status, "Run finished");
                    }
                    Err(e) => {
                        error!(run_id = %run_id, error = %e, "Failed to execute run");
                    }
                }
            });
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Poll for due runs until cancelled
    ///
    /// After cancellation the task waits up to `shutdown_grace` for in-flight runs.
    /// Returns `true` when every run finished within the grace period.
    pub async fn run(self) -> bool {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs_f64(),
            max_concurrent_runs = self.permits,
            "Dispatcher started"
        );

        while !self.cancel_token.is_cancelled() {
            match self.tick().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "Dispatched due runs"),
                Err(e) => error!(error = %e, "Failed to claim due runs"),
            }

            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        let drained = self.drain().await;
        info!(drained, "Dispatcher stopped");
        drained
    }

    async fn drain(&self) -> bool {
        let in_flight = self.in_flight();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight runs to finish");
        }

        match timeout(
            self.config.shutdown_grace,
            self.concurrent_limit.acquire_many(self.permits),
        )
        .await
        {
            Ok(Ok(_all)) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(
                    in_flight = self.in_flight(),
                    "Shutdown grace period elapsed with runs still executing"
                );
                false
            }
        }
    }
}
