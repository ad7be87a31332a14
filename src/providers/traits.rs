//! Collaborator traits consumed by the newsletter pipeline

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::db::Database;
use crate::types::{Article, PreferenceSnapshot};

/// Source of recent articles per category
///
/// Implementors provide [`fetch_category`](ArticleSource::fetch_category); the provided
/// [`fetch`](ArticleSource::fetch) fans out over all categories concurrently and
/// degrades failed categories to zero articles, so it never errors.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Fetch recent articles for a single category
    async fn fetch_category(&self, category: &str) -> Result<Vec<Article>>;

    /// Fetch articles for every category, in category order
    async fn fetch(&self, categories: &[String]) -> Vec<Article> {
        let results = join_all(
            categories
                .iter()
                .map(|category| async move { (category, self.fetch_category(category).await) }),
        )
        .await;

        results
            .into_iter()
            .flat_map(|(category, result)| match result {
                Ok(articles) => articles,
                Err(e) => {
                    tracing::warn!(category = %category, error = %e, "Failed to fetch articles for category");
                    Vec::new()
                }
            })
            .collect()
    }
}

/// Text returned by a [`Summarizer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub content: String,
}

/// Language model that writes the newsletter
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Run one inference with a system instruction and a user prompt
    async fn infer(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion>;
}

/// Template values sent alongside the rendered newsletter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    /// Categories covered
    pub categories: Vec<String>,
    /// Number of articles the newsletter was built from
    pub article_count: usize,
    /// Date of sending
    pub current_date: NaiveDate,
}

impl DeliveryMetadata {
    /// Categories as a comma-separated list
    pub fn categories_label(&self) -> String {
        self.categories.join(", ")
    }

    /// Date in month/day/year form, e.g. `3/9/2026`
    pub fn date_label(&self) -> String {
        self.current_date.format("%-m/%-d/%Y").to_string()
    }
}

/// Email transport
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send the rendered newsletter to `recipient`
    async fn send(&self, recipient: &str, rendered_content: &str, metadata: &DeliveryMetadata) -> Result<()>;
}

/// Read access to user preferences
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Current preferences of `user_id`, or `None` if the user has none
    async fn get(&self, user_id: &str) -> Result<Option<PreferenceSnapshot>>;
}

#[async_trait]
impl PreferenceStore for Database {
    async fn get(&self, user_id: &str) -> Result<Option<PreferenceSnapshot>> {
        self.get_preferences(user_id).await
    }
}
