//! User preferences, read by the pipeline's liveness check.

use crate::error::DatabaseError;
use crate::types::PreferenceSnapshot;
use crate::{Error, Result};

use super::{Database, PreferenceRow};

impl Database {
    /// Get a user's preferences
    pub async fn get_preferences(&self, user_id: &str) -> Result<Option<PreferenceSnapshot>> {
        let row = sqlx::query_as::<_, PreferenceRow>(
            r#"
            SELECT user_id, email, categories, frequency, is_active, updated_at
            FROM user_preferences
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get preferences: {}",
                e
            )))
        })?;

        row.map(PreferenceSnapshot::try_from).transpose()
    }

    /// Insert or replace a user's preferences
    pub async fn upsert_preferences(&self, prefs: &PreferenceSnapshot) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let categories = serde_json::to_string(&prefs.categories)?;

        sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, email, categories, frequency, is_active, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                categories = excluded.categories,
                frequency = excluded.frequency,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&prefs.user_id)
        .bind(&prefs.email)
        .bind(categories)
        .bind(prefs.frequency.as_str())
        .bind(i32::from(prefs.is_active))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert preferences: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Pause or resume a subscription
    ///
    /// Returns `false` when the user has no preferences.
    pub async fn set_preferences_active(&self, user_id: &str, active: bool) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE user_preferences SET is_active = ?, updated_at = ? WHERE user_id = ?",
        )
        .bind(i32::from(active))
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update preference status: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }
}
