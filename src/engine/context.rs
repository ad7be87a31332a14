//! Per-run step execution with memoization and scoped retry

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::RetryConfig;
use crate::db::Database;
use crate::error::StepError;
use crate::retry::{will_retry, with_retry};
use crate::types::{Event, RunId, StepStatus};

/// Handle through which a pipeline runs its named steps
///
/// Every step body runs at most until it succeeds once per run: a succeeded step's
/// JSON result is persisted and replayed on any later execution of the same run,
/// including after a process restart.
pub struct StepContext {
    run_id: RunId,
    db: Arc<Database>,
    retry: RetryConfig,
    event_tx: broadcast::Sender<Event>,
    declared: HashSet<String>,
    results: HashMap<String, serde_json::Value>,
    failed_step: Option<String>,
}

impl StepContext {
    pub(crate) fn new(
        run_id: RunId,
        db: Arc<Database>,
        retry: RetryConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            run_id,
            db,
            retry,
            event_tx,
            declared: HashSet::new(),
            results: HashMap::new(),
            failed_step: None,
        }
    }

    /// Run being executed
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Step whose failure ended the run, if any
    pub fn failed_step(&self) -> Option<&str> {
        self.failed_step.as_deref()
    }

    /// Result of an earlier step of this run, if it has completed
    pub fn previous<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.results
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Execute the step `name`, or replay its recorded result
    ///
    /// `body` is invoked once per attempt. Retryable failures are retried with the
    /// configured backoff; only this step is retried. A body returning
    /// [`StepError::Skip`] is passed through without recording a result.
    pub async fn step<T, F, Fut>(&mut self, name: &str, mut body: F) -> Result<T, StepError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StepError>> + Send,
    {
        if !self.declared.insert(name.to_string()) {
            self.failed_step = Some(name.to_string());
            return Err(StepError::DuplicateStep(name.to_string()));
        }

        if let Some(record) = self.db.get_step(self.run_id, name).await?
            && record.status == StepStatus::Succeeded
        {
            let value = record.result.unwrap_or(serde_json::Value::Null);
            let output: T = serde_json::from_value(value.clone())?;
            tracing::debug!(run_id = %self.run_id, step = name, "Replaying recorded step result");
            self.emit(Event::StepReplayed {
                run_id: self.run_id,
                step: name.to_string(),
            });
            self.results.insert(name.to_string(), value);
            return Ok(output);
        }

        let run_id = self.run_id;
        let mut last_attempt = 0;
        let outcome = {
            let db = &self.db;
            let event_tx = &self.event_tx;
            let retry = &self.retry;
            with_retry(&self.retry, |attempt| {
                last_attempt = attempt;
                let attempt_future = body();
                let db = Arc::clone(db);
                let event_tx = event_tx.clone();
                let retry = retry.clone();
                let name = name.to_string();
                async move {
                    db.start_step_attempt(run_id, &name).await?;
                    tracing::debug!(run_id = %run_id, step = %name, attempt, "Running step");

                    match attempt_future.await {
                        Ok(output) => Ok(output),
                        Err(e @ StepError::Skip { .. }) => Err(e),
                        Err(e) => {
                            let message = e.to_string();
                            if let Err(db_err) = db.record_step_error(run_id, &name, &message).await {
                                tracing::warn!(run_id = %run_id, step = %name, error = %db_err, "Failed to record step error");
                            }
                            event_tx
                                .send(Event::StepAttemptFailed {
                                    run_id,
                                    step: name.clone(),
                                    attempt,
                                    error: message,
                                    will_retry: will_retry(&retry, &e, attempt),
                                })
                                .ok();
                            Err(e)
                        }
                    }
                }
            })
            .await
        };

        match outcome {
            Ok(output) => {
                let value = match self.record_success(name, &output).await {
                    Ok(value) => value,
                    Err(e) => {
                        self.failed_step = Some(name.to_string());
                        if let Err(db_err) = self.db.fail_step(run_id, name, &e.to_string()).await {
                            tracing::warn!(run_id = %run_id, step = name, error = %db_err, "Failed to mark step failed");
                        }
                        tracing::error!(run_id = %run_id, step = name, error = %e, "Failed to record step result");
                        return Err(e);
                    }
                };
                tracing::info!(run_id = %run_id, step = name, attempts = last_attempt, "Step completed");
                self.emit(Event::StepCompleted {
                    run_id,
                    step: name.to_string(),
                    attempts: last_attempt,
                });
                self.results.insert(name.to_string(), value);
                Ok(output)
            }
            Err(e @ StepError::Skip { .. }) => Err(e),
            Err(e) => {
                self.failed_step = Some(name.to_string());
                if let Err(db_err) = self.db.fail_step(run_id, name, &e.to_string()).await {
                    tracing::warn!(run_id = %run_id, step = name, error = %db_err, "Failed to mark step failed");
                }
                tracing::error!(run_id = %run_id, step = name, attempts = last_attempt, error = %e, "Step failed");
                Err(e)
            }
        }
    }

    async fn record_success<T: Serialize>(
        &self,
        name: &str,
        output: &T,
    ) -> Result<serde_json::Value, StepError> {
        let value = serde_json::to_value(output)?;
        self.db.complete_step(self.run_id, name, &value).await?;
        Ok(value)
    }

    fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}
