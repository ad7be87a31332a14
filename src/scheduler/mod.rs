//! Durable run scheduling
//!
//! The [`Scheduler`] turns "run the newsletter pipeline for this user at time T" into a
//! row in `scheduled_runs`. The dispatcher in [`crate::scheduler_task`] later claims the
//! row once it is due. There is no cancellation: a paused user's runs still fire and
//! end as `skipped` at the pipeline's liveness check.

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::db::Database;
use crate::frequency::next_trigger;
use crate::providers::PreferenceStore;
use crate::types::{Event, EventEnvelope, RunId, RunPayload, ScheduleEvent};
use crate::{Error, Result};

/// Anything that can enqueue a future run
///
/// The newsletter pipeline schedules its successor through this seam.
#[async_trait]
pub trait RunScheduler: Send + Sync {
    /// Enqueue `payload` to run no earlier than `trigger_at`
    async fn schedule(&self, payload: RunPayload, trigger_at: DateTime<Utc>) -> Result<RunId>;
}

/// Enqueues runs and derives trigger times from user preferences
pub struct Scheduler {
    db: Arc<Database>,
    preferences: Arc<dyn PreferenceStore>,
    event_tx: broadcast::Sender<Event>,
}

impl Scheduler {
    /// Create a scheduler writing to `db` and reading preferences from `preferences`
    pub fn new(
        db: Arc<Database>,
        preferences: Arc<dyn PreferenceStore>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            db,
            preferences,
            event_tx,
        }
    }

    /// Enqueue a durable run of `payload` at or after `trigger_at`
    ///
    /// Blank categories are dropped. Fails with [`Error::InvalidEvent`] when the payload
    /// has no email, no user, or no usable category.
    pub async fn schedule_run(&self, payload: &RunPayload, trigger_at: DateTime<Utc>) -> Result<RunId> {
        payload.validate()?;

        let payload = RunPayload {
            categories: payload
                .categories
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            ..payload.clone()
        };

        let run_id = self.db.insert_run(&payload, trigger_at).await?;

        tracing::info!(
            run_id = %run_id,
            user_id = %payload.user_id,
            trigger_at = %trigger_at,
            frequency = %payload.frequency,
            is_test = payload.is_test,
            "Scheduled newsletter run"
        );
        self.emit_event(Event::RunScheduled {
            run_id,
            user_id: payload.user_id.clone(),
            trigger_at,
        });

        Ok(run_id)
    }

    /// Schedule the next run of `user_id` from their current preferences
    ///
    /// Called after a preference save or a reactivation. Fails with
    /// [`Error::NotFound`] when the user has no preferences.
    pub async fn reschedule(&self, user_id: &str) -> Result<RunId> {
        let prefs = self
            .preferences
            .get(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no preferences for user {}", user_id)))?;

        let trigger_at = next_trigger(prefs.frequency, &Local::now()).with_timezone(&Utc);
        let payload = RunPayload {
            user_id: prefs.user_id,
            email: prefs.email,
            categories: prefs.categories,
            frequency: prefs.frequency,
            is_test: false,
        };

        self.schedule_run(&payload, trigger_at).await
    }

    /// Accept a `newsletter.schedule` event body
    pub async fn accept_event(&self, event: ScheduleEvent) -> Result<RunId> {
        let (payload, trigger_at) = event.into_parts();
        self.schedule_run(&payload, trigger_at).await
    }

    /// Accept a named event, rejecting anything but `newsletter.schedule`
    pub async fn accept_envelope(&self, envelope: EventEnvelope) -> Result<RunId> {
        if envelope.name != ScheduleEvent::NAME {
            return Err(Error::InvalidEvent(format!(
                "unsupported event '{}', expected '{}'",
                envelope.name,
                ScheduleEvent::NAME
            )));
        }
        self.accept_event(envelope.data).await
    }

    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

#[async_trait]
impl RunScheduler for Scheduler {
    async fn schedule(&self, payload: RunPayload, trigger_at: DateTime<Utc>) -> Result<RunId> {
        self.schedule_run(&payload, trigger_at).await
    }
}
