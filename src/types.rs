//! Core types for newsletter-scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, Result};
use crate::frequency::Frequency;

/// Unique identifier for a scheduled run
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl RunId {
    /// Create a new RunId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RunId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<RunId> for i64 {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for RunId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for RunId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RunId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RunId {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Lifecycle status of a scheduled run
///
/// `pending → running → {succeeded | failed | skipped}`; the last three are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Waiting for its trigger time
    Pending,
    /// Claimed by the engine
    Running,
    /// Every step completed
    Succeeded,
    /// A step exhausted its retries or failed permanently
    Failed,
    /// Ended early by the liveness check
    Skipped,
}

impl RunStatus {
    /// Convert integer status code to RunStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => RunStatus::Pending,
            1 => RunStatus::Running,
            2 => RunStatus::Succeeded,
            3 => RunStatus::Failed,
            4 => RunStatus::Skipped,
            _ => RunStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert RunStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Running => 1,
            RunStatus::Succeeded => 2,
            RunStatus::Failed => 3,
            RunStatus::Skipped => 4,
        }
    }

    /// Whether the run has finished and must never execute again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Skipped
        )
    }
}

/// Status of one step within a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Started but not yet finished (or interrupted mid-attempt)
    Pending,
    /// Finished; its result is replayed on re-execution
    Succeeded,
    /// Exhausted its retries
    Failed,
}

impl StepStatus {
    /// Convert integer status code to StepStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => StepStatus::Pending,
            1 => StepStatus::Succeeded,
            _ => StepStatus::Failed,
        }
    }

    /// Convert StepStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Succeeded => 1,
            StepStatus::Failed => 2,
        }
    }
}

/// Immutable snapshot carried by a scheduled run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunPayload {
    /// Owner of the subscription
    pub user_id: String,
    /// Recipient address
    pub email: String,
    /// Content categories to cover
    pub categories: Vec<String>,
    /// Cadence used to compute the next run
    #[serde(default)]
    pub frequency: Frequency,
    /// Test runs never schedule a follow-up
    #[serde(default)]
    pub is_test: bool,
}

impl RunPayload {
    /// Reject payloads that could never produce a newsletter
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidEvent("userId must not be empty".into()));
        }
        if self.email.trim().is_empty() {
            return Err(Error::InvalidEvent("email must not be empty".into()));
        }
        if self.categories.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::InvalidEvent(
                "categories must contain at least one entry".into(),
            ));
        }
        Ok(())
    }
}

/// The `newsletter.schedule` boundary event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEvent {
    /// Owner of the subscription
    pub user_id: String,
    /// Recipient address
    pub email: String,
    /// Content categories to cover
    pub categories: Vec<String>,
    /// Cadence label; unknown values fall back to weekly
    #[serde(default)]
    pub frequency: Frequency,
    /// Earliest time the run may execute
    pub scheduled_for: DateTime<Utc>,
    /// Suppresses the follow-up schedule
    #[serde(default)]
    pub is_test: bool,
}

impl ScheduleEvent {
    /// Name under which the event travels on the wire
    pub const NAME: &'static str = "newsletter.schedule";

    /// Split the event into the run payload and its trigger time
    pub fn into_parts(self) -> (RunPayload, DateTime<Utc>) {
        (
            RunPayload {
                user_id: self.user_id,
                email: self.email,
                categories: self.categories,
                frequency: self.frequency,
                is_test: self.is_test,
            },
            self.scheduled_for,
        )
    }

    /// Build the event that schedules `payload` at `scheduled_for`
    pub fn from_payload(payload: &RunPayload, scheduled_for: DateTime<Utc>) -> Self {
        Self {
            user_id: payload.user_id.clone(),
            email: payload.email.clone(),
            categories: payload.categories.clone(),
            frequency: payload.frequency,
            scheduled_for,
            is_test: payload.is_test,
        }
    }
}

/// Named event envelope `{ "name": ..., "data": ... }`
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct EventEnvelope {
    /// Event name; only `newsletter.schedule` is accepted
    pub name: String,
    /// Event body
    pub data: ScheduleEvent,
}

/// A durable request to execute the pipeline for one user at or after `trigger_at`
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ScheduledRun {
    /// Run identifier
    pub id: RunId,
    /// Owner of the subscription
    pub user_id: String,
    /// The run must not execute before this instant
    pub trigger_at: DateTime<Utc>,
    /// Snapshot taken when the run was scheduled
    pub payload: RunPayload,
    /// Lifecycle status
    pub status: RunStatus,
    /// When the run was enqueued
    pub created_at: DateTime<Utc>,
    /// When the engine last claimed the run
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Pipeline output for succeeded runs
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
    /// Failure message for failed runs, reason for skipped runs
    pub error: Option<String>,
    /// Step that failed the run
    pub failed_step: Option<String>,
}

/// Persisted state of one named step within a run
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StepRecord {
    /// Owning run
    pub run_id: RunId,
    /// Step name, unique within the run
    pub step_name: String,
    /// Step status
    pub status: StepStatus,
    /// JSON result of a succeeded step
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
    /// Attempts made so far
    pub attempts: u32,
    /// Error from the most recent failed attempt
    pub last_error: Option<String>,
    /// When the first attempt began
    pub started_at: DateTime<Utc>,
    /// When the step succeeded or gave up
    pub completed_at: Option<DateTime<Utc>>,
}

/// One article returned by the article source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Article {
    /// Headline
    pub title: String,
    /// Link to the full article
    pub url: String,
    /// Short description
    pub description: String,
}

/// A user's current subscription preferences
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceSnapshot {
    /// Owner of the preferences
    pub user_id: String,
    /// Recipient address
    pub email: String,
    /// Selected categories
    pub categories: Vec<String>,
    /// Delivery cadence
    pub frequency: Frequency,
    /// `false` pauses the subscription
    pub is_active: bool,
}

/// Output of a completed newsletter run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewsletterResult {
    /// Whether an email was sent
    pub success: bool,
    /// Markdown newsletter content
    pub content: String,
    /// Number of articles the newsletter was built from
    pub article_count: usize,
    /// Categories covered
    pub categories: Vec<String>,
    /// Follow-up run, absent for test runs
    pub next_run_id: Option<RunId>,
    /// Trigger time of the follow-up run
    pub next_run_at: Option<DateTime<Utc>>,
}

/// A delivered newsletter kept for history
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct NewsletterRecord {
    /// Record identifier
    pub id: i64,
    /// Run that produced the newsletter
    pub run_id: RunId,
    /// Recipient user
    pub user_id: String,
    /// Title taken from the first heading
    pub title: String,
    /// Markdown content
    pub content: String,
    /// Categories covered
    pub categories: Vec<String>,
    /// Number of articles used
    pub article_count: usize,
    /// When the newsletter was sent
    pub created_at: DateTime<Utc>,
}

/// Event emitted during the run lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run was enqueued
    RunScheduled {
        /// Run ID
        run_id: RunId,
        /// Owner
        user_id: String,
        /// Earliest execution time
        trigger_at: DateTime<Utc>,
    },

    /// The engine began executing a run
    RunStarted {
        /// Run ID
        run_id: RunId,
        /// Owner
        user_id: String,
    },

    /// A step body completed and its result was recorded
    StepCompleted {
        /// Run ID
        run_id: RunId,
        /// Step name
        step: String,
        /// Attempts it took
        attempts: u32,
    },

    /// A recorded step result was reused instead of running the body
    StepReplayed {
        /// Run ID
        run_id: RunId,
        /// Step name
        step: String,
    },

    /// A step attempt failed
    StepAttemptFailed {
        /// Run ID
        run_id: RunId,
        /// Step name
        step: String,
        /// 1-based attempt number
        attempt: u32,
        /// Error message
        error: String,
        /// Whether another attempt will follow
        will_retry: bool,
    },

    /// A run finished successfully
    RunSucceeded {
        /// Run ID
        run_id: RunId,
        /// Owner
        user_id: String,
    },

    /// A run ended early
    RunSkipped {
        /// Run ID
        run_id: RunId,
        /// Owner
        user_id: String,
        /// Why the run stopped
        reason: String,
    },

    /// A run failed
    RunFailed {
        /// Run ID
        run_id: RunId,
        /// Owner
        user_id: String,
        /// Step that failed, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<String>,
        /// Error message
        error: String,
    },

    /// The follow-up run could not be scheduled; the user receives no further newsletters
    ChainBroken {
        /// Run that failed to reschedule
        run_id: RunId,
        /// Affected user
        user_id: String,
        /// Error message
        error: String,
    },

    /// An alert webhook could not be delivered
    WebhookFailed {
        /// Webhook URL
        url: String,
        /// Error message
        error: String,
    },

    /// Service is shutting down
    Shutdown,
}

/// Payload POSTed to alert webhooks
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookPayload {
    /// Event type (run_failed, chain_broken)
    pub event: String,

    /// Run that triggered the alert
    pub run_id: RunId,

    /// Affected user
    pub user_id: String,

    /// Failing step, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    /// Error message
    pub error: String,

    /// Timestamp of the event (Unix timestamp in seconds)
    pub timestamp: i64,
}
