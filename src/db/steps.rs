//! Step records: the memoization ledger of each run.

use crate::error::DatabaseError;
use crate::types::{RunId, StepRecord, StepStatus};
use crate::{Error, Result};

use super::{Database, StepRow};

const STEP_COLUMNS: &str =
    "run_id, step_name, status, result, attempts, last_error, started_at, completed_at";

impl Database {
    /// Get the record of one step
    pub async fn get_step(&self, run_id: RunId, step_name: &str) -> Result<Option<StepRecord>> {
        let row = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM step_records WHERE run_id = ? AND step_name = ?",
            STEP_COLUMNS
        ))
        .bind(run_id)
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get step record: {}",
                e
            )))
        })?;

        row.map(StepRecord::try_from).transpose()
    }

    /// List all step records of a run in the order they were first started
    pub async fn list_steps(&self, run_id: RunId) -> Result<Vec<StepRecord>> {
        let rows = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM step_records WHERE run_id = ? ORDER BY started_at ASC, rowid ASC",
            STEP_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list step records: {}",
                e
            )))
        })?;

        rows.into_iter().map(StepRecord::try_from).collect()
    }

    /// Register the start of an attempt and return the attempt count so far
    ///
    /// Creates the record on the first attempt. A record that previously failed is
    /// reopened as pending.
    pub async fn start_step_attempt(&self, run_id: RunId, step_name: &str) -> Result<u32> {
        let now = chrono::Utc::now().timestamp();
        let attempts: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO step_records (run_id, step_name, status, attempts, started_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT(run_id, step_name) DO UPDATE
                SET attempts = attempts + 1, status = excluded.status
            RETURNING attempts
            "#,
        )
        .bind(run_id)
        .bind(step_name)
        .bind(StepStatus::Pending.to_i32())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to start step attempt: {}",
                e
            )))
        })?;

        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    /// Store the error of a failed attempt without finalizing the step
    pub async fn record_step_error(&self, run_id: RunId, step_name: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE step_records SET last_error = ? WHERE run_id = ? AND step_name = ?")
            .bind(error)
            .bind(run_id)
            .bind(step_name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to record step error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Finalize a step as succeeded with its JSON result
    pub async fn complete_step(
        &self,
        run_id: RunId,
        step_name: &str,
        result: &serde_json::Value,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let json = serde_json::to_string(result)?;

        sqlx::query(
            r#"
            UPDATE step_records
            SET status = ?, result = ?, completed_at = ?
            WHERE run_id = ? AND step_name = ?
            "#,
        )
        .bind(StepStatus::Succeeded.to_i32())
        .bind(json)
        .bind(now)
        .bind(run_id)
        .bind(step_name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to complete step: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Finalize a step as failed after its retry budget is spent
    pub async fn fail_step(&self, run_id: RunId, step_name: &str, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE step_records
            SET status = ?, last_error = ?, completed_at = ?
            WHERE run_id = ? AND step_name = ?
            "#,
        )
        .bind(StepStatus::Failed.to_i32())
        .bind(error)
        .bind(now)
        .bind(run_id)
        .bind(step_name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark step failed: {}",
                e
            )))
        })?;

        Ok(())
    }
}
