//! Database layer for newsletter-scheduler
//!
//! Handles SQLite persistence for scheduled runs, step records, preferences and
//! newsletter history.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`runs`] - Scheduled run queue and lifecycle transitions
//! - [`steps`] - Per-step memoization records
//! - [`preferences`] - User preferences (implements [`PreferenceStore`](crate::providers::PreferenceStore))
//! - [`newsletters`] - Delivered newsletter history
//! - [`state`] - Runtime state (shutdown tracking)

use crate::error::{Error, Result};
use crate::frequency::Frequency;
use crate::types::{
    NewsletterRecord, PreferenceSnapshot, RunId, RunStatus, ScheduledRun, StepRecord, StepStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod newsletters;
mod preferences;
mod runs;
mod state;
mod steps;

/// Scheduled run record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    /// Unique database ID
    pub id: i64,
    /// Owner of the subscription
    pub user_id: String,
    /// Unix timestamp before which the run must not execute
    pub trigger_at: i64,
    /// JSON-encoded [`RunPayload`](crate::types::RunPayload)
    pub payload: String,
    /// Lifecycle status code (see [`RunStatus::to_i32`])
    pub status: i32,
    /// Unix timestamp when the run was enqueued
    pub created_at: i64,
    /// Unix timestamp when the run was last claimed
    pub started_at: Option<i64>,
    /// Unix timestamp when the run reached a terminal status
    pub finished_at: Option<i64>,
    /// JSON-encoded pipeline output
    pub result: Option<String>,
    /// Failure message or skip reason
    pub error: Option<String>,
    /// Step that failed the run
    pub failed_step: Option<String>,
}

impl TryFrom<RunRow> for ScheduledRun {
    type Error = Error;

    fn try_from(row: RunRow) -> Result<Self> {
        let result = row
            .result
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(ScheduledRun {
            id: RunId(row.id),
            user_id: row.user_id,
            trigger_at: timestamp_to_datetime(row.trigger_at),
            payload: serde_json::from_str(&row.payload)?,
            status: RunStatus::from_i32(row.status),
            created_at: timestamp_to_datetime(row.created_at),
            started_at: row.started_at.map(timestamp_to_datetime),
            finished_at: row.finished_at.map(timestamp_to_datetime),
            result,
            error: row.error,
            failed_step: row.failed_step,
        })
    }
}

/// Step record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct StepRow {
    /// Owning run
    pub run_id: i64,
    /// Step name
    pub step_name: String,
    /// Status code (see [`StepStatus::to_i32`])
    pub status: i32,
    /// JSON-encoded result of a succeeded step
    pub result: Option<String>,
    /// Attempts made so far
    pub attempts: i64,
    /// Error from the most recent failed attempt
    pub last_error: Option<String>,
    /// Unix timestamp of the first attempt
    pub started_at: i64,
    /// Unix timestamp when the step succeeded or gave up
    pub completed_at: Option<i64>,
}

impl TryFrom<StepRow> for StepRecord {
    type Error = Error;

    fn try_from(row: StepRow) -> Result<Self> {
        let result = row
            .result
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(StepRecord {
            run_id: RunId(row.run_id),
            step_name: row.step_name,
            status: StepStatus::from_i32(row.status),
            result,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            last_error: row.last_error,
            started_at: timestamp_to_datetime(row.started_at),
            completed_at: row.completed_at.map(timestamp_to_datetime),
        })
    }
}

/// User preference record from database
#[derive(Debug, Clone, FromRow)]
pub struct PreferenceRow {
    /// Owner of the preferences
    pub user_id: String,
    /// Recipient address
    pub email: String,
    /// JSON array of category names
    pub categories: String,
    /// Cadence label
    pub frequency: String,
    /// Whether the subscription is active (0 = paused, 1 = active)
    pub is_active: i32,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

impl TryFrom<PreferenceRow> for PreferenceSnapshot {
    type Error = Error;

    fn try_from(row: PreferenceRow) -> Result<Self> {
        Ok(PreferenceSnapshot {
            user_id: row.user_id,
            email: row.email,
            categories: serde_json::from_str(&row.categories)?,
            frequency: Frequency::from_label(&row.frequency),
            is_active: row.is_active != 0,
        })
    }
}

/// New newsletter to be inserted into the history table
#[derive(Debug, Clone)]
pub struct NewNewsletter<'a> {
    /// Run that produced the newsletter
    pub run_id: RunId,
    /// Recipient user
    pub user_id: &'a str,
    /// Title taken from the first heading
    pub title: &'a str,
    /// Markdown content
    pub content: &'a str,
    /// Categories covered
    pub categories: &'a [String],
    /// Number of articles used
    pub article_count: usize,
}

/// Newsletter history record from database
#[derive(Debug, Clone, FromRow)]
pub struct NewsletterRow {
    /// Unique database ID
    pub id: i64,
    /// Run that produced the newsletter
    pub run_id: i64,
    /// Recipient user
    pub user_id: String,
    /// Title
    pub title: String,
    /// Markdown content
    pub content: String,
    /// JSON array of category names
    pub categories: String,
    /// Number of articles used
    pub article_count: i64,
    /// Unix timestamp when the newsletter was sent
    pub created_at: i64,
}

impl TryFrom<NewsletterRow> for NewsletterRecord {
    type Error = Error;

    fn try_from(row: NewsletterRow) -> Result<Self> {
        Ok(NewsletterRecord {
            id: row.id,
            run_id: RunId(row.run_id),
            user_id: row.user_id,
            title: row.title,
            content: row.content,
            categories: serde_json::from_str(&row.categories)?,
            article_count: usize::try_from(row.article_count).unwrap_or_default(),
            created_at: timestamp_to_datetime(row.created_at),
        })
    }
}

/// Whole-second timestamp stored for a trigger time
///
/// A fractional second rounds up, so a stored trigger is never earlier than requested.
pub(crate) fn trigger_timestamp(at: &DateTime<Utc>) -> i64 {
    at.timestamp() + i64::from(at.timestamp_subsec_nanos() > 0)
}

/// Convert a stored Unix timestamp back into a UTC instant
pub(crate) fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

/// Database handle for newsletter-scheduler
pub struct Database {
    pool: SqlitePool,
}
