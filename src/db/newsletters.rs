//! Newsletter history.

use crate::error::DatabaseError;
use crate::types::NewsletterRecord;
use crate::{Error, Result};

use super::{Database, NewNewsletter, NewsletterRow};

impl Database {
    /// Record a delivered newsletter
    pub async fn insert_newsletter(&self, newsletter: &NewNewsletter<'_>) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let categories = serde_json::to_string(newsletter.categories)?;
        let article_count = i64::try_from(newsletter.article_count).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            INSERT INTO newsletters (run_id, user_id, title, content, categories, article_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(newsletter.run_id)
        .bind(newsletter.user_id)
        .bind(newsletter.title)
        .bind(newsletter.content)
        .bind(categories)
        .bind(article_count)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert newsletter: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// List a user's newsletters, newest first
    pub async fn list_newsletters(&self, user_id: &str, limit: i64) -> Result<Vec<NewsletterRecord>> {
        let rows = sqlx::query_as::<_, NewsletterRow>(
            r#"
            SELECT id, run_id, user_id, title, content, categories, article_count, created_at
            FROM newsletters
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list newsletters: {}",
                e
            )))
        })?;

        rows.into_iter().map(NewsletterRecord::try_from).collect()
    }
}
