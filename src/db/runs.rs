//! Scheduled run queue: enqueue, atomic claim, lifecycle transitions.

use crate::error::DatabaseError;
use crate::types::{RunId, RunPayload, RunStatus, ScheduledRun};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::{Database, RunRow, trigger_timestamp};

const RUN_COLUMNS: &str = "id, user_id, trigger_at, payload, status, created_at, started_at, \
                           finished_at, result, error, failed_step";

impl Database {
    /// Enqueue a run that must not execute before `trigger_at`
    ///
    /// Trigger times are stored in whole seconds, rounded up.
    pub async fn insert_run(&self, payload: &RunPayload, trigger_at: DateTime<Utc>) -> Result<RunId> {
        let now = Utc::now().timestamp();
        let payload_json = serde_json::to_string(payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_runs (user_id, trigger_at, payload, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&payload.user_id)
        .bind(trigger_timestamp(&trigger_at))
        .bind(&payload_json)
        .bind(RunStatus::Pending.to_i32())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert scheduled run: {}",
                e
            )))
        })?;

        Ok(RunId(result.last_insert_rowid()))
    }

    /// Get a run by ID
    pub async fn get_run(&self, id: RunId) -> Result<Option<ScheduledRun>> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM scheduled_runs WHERE id = ?",
            RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get scheduled run: {}",
                e
            )))
        })?;

        row.map(ScheduledRun::try_from).transpose()
    }

    /// List a user's runs, newest trigger first
    pub async fn list_runs_for_user(&self, user_id: &str) -> Result<Vec<ScheduledRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM scheduled_runs WHERE user_id = ? ORDER BY trigger_at DESC, id DESC",
            RUN_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list runs for user: {}",
                e
            )))
        })?;

        rows.into_iter().map(ScheduledRun::try_from).collect()
    }

    /// List runs with the given status, earliest trigger first
    pub async fn list_runs_by_status(&self, status: RunStatus) -> Result<Vec<ScheduledRun>> {
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {} FROM scheduled_runs WHERE status = ? ORDER BY trigger_at ASC, id ASC",
            RUN_COLUMNS
        ))
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list runs by status: {}",
                e
            )))
        })?;

        rows.into_iter().map(ScheduledRun::try_from).collect()
    }

    /// Atomically move up to `limit` due pending runs to `running` and return them
    ///
    /// A run is due when `trigger_at <= now`. The select and the status change happen
    /// in one statement, so two dispatchers never claim the same run.
    pub async fn claim_due_runs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledRun>> {
        let now_ts = now.timestamp();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            UPDATE scheduled_runs
            SET status = ?, started_at = ?
            WHERE id IN (
                SELECT id FROM scheduled_runs
                WHERE status = ? AND trigger_at <= ?
                ORDER BY trigger_at ASC, id ASC
                LIMIT ?
            )
            RETURNING {}
            "#,
            RUN_COLUMNS
        ))
        .bind(RunStatus::Running.to_i32())
        .bind(now_ts)
        .bind(RunStatus::Pending.to_i32())
        .bind(now_ts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim due runs: {}",
                e
            )))
        })?;

        let mut runs = rows
            .into_iter()
            .map(ScheduledRun::try_from)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING does not preserve the subquery order
        runs.sort_by_key(|r| (r.trigger_at, r.id));
        Ok(runs)
    }

    /// Mark a pending or already-claimed run as `running`
    ///
    /// Returns `false` when the run is terminal (or missing) and must not execute.
    pub async fn start_run(&self, id: RunId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_runs
            SET status = ?, started_at = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(RunStatus::Running.to_i32())
        .bind(now.timestamp())
        .bind(id)
        .bind(RunStatus::Pending.to_i32())
        .bind(RunStatus::Running.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to start run: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a successful run with its JSON result
    pub async fn finish_run_succeeded(&self, id: RunId, result: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_string(result)?;
        self.finish_run(id, RunStatus::Succeeded, Some(json), None, None)
            .await
    }

    /// Record a run that stopped early
    pub async fn finish_run_skipped(&self, id: RunId, reason: &str) -> Result<()> {
        self.finish_run(id, RunStatus::Skipped, None, Some(reason), None)
            .await
    }

    /// Record a failed run and the step that caused it
    pub async fn finish_run_failed(
        &self,
        id: RunId,
        failed_step: Option<&str>,
        error: &str,
    ) -> Result<()> {
        self.finish_run(id, RunStatus::Failed, None, Some(error), failed_step)
            .await
    }

    async fn finish_run(
        &self,
        id: RunId,
        status: RunStatus,
        result: Option<String>,
        error: Option<&str>,
        failed_step: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE scheduled_runs
            SET status = ?, finished_at = ?, result = ?, error = ?, failed_step = ?
            WHERE id = ?
            "#,
        )
        .bind(status.to_i32())
        .bind(now)
        .bind(result)
        .bind(error)
        .bind(failed_step)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to finish run: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Return runs left `running` by an earlier process to `pending`
    ///
    /// Their succeeded steps stay recorded, so re-execution replays them.
    pub async fn requeue_interrupted_runs(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE scheduled_runs SET status = ? WHERE status = ?")
            .bind(RunStatus::Pending.to_i32())
            .bind(RunStatus::Running.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to requeue interrupted runs: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Count runs with the given status
    pub async fn count_runs_by_status(&self, status: RunStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scheduled_runs WHERE status = ?")
            .bind(status.to_i32())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count runs: {}",
                    e
                )))
            })?;

        Ok(count)
    }
}
