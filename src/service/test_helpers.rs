//! Shared test helpers for creating NewsletterService instances in tests.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::tempdir;

use crate::Result;
use crate::config::Config;
use crate::providers::{ArticleSource, Completion, DeliveryChannel, DeliveryMetadata, Summarizer};
use crate::types::Article;

use super::{Collaborators, NewsletterService};

/// Article source returning one article per category
pub(crate) struct StaticArticles;

#[async_trait]
impl ArticleSource for StaticArticles {
    async fn fetch_category(&self, category: &str) -> Result<Vec<Article>> {
        Ok(vec![Article {
            title: format!("{} headline", category),
            url: format!("https://news.example.com/{}", category),
            description: format!("What happened in {}", category),
        }])
    }
}

/// Summarizer returning fixed markdown
pub(crate) struct StaticSummarizer;

#[async_trait]
impl Summarizer for StaticSummarizer {
    async fn infer(&self, _system_prompt: &str, _user_prompt: &str) -> Result<Completion> {
        Ok(Completion {
            content: "# Daily Digest\n\nAll the news.".to_string(),
        })
    }
}

/// Delivery channel remembering recipients
#[derive(Default)]
pub(crate) struct RecordingDelivery {
    pub(crate) recipients: Mutex<Vec<String>>,
}

#[async_trait]
impl DeliveryChannel for RecordingDelivery {
    async fn send(&self, recipient: &str, _rendered_content: &str, _metadata: &DeliveryMetadata) -> Result<()> {
        self.recipients.lock().unwrap().push(recipient.to_string());
        Ok(())
    }
}

/// Test configuration with a database inside `dir` and a fast dispatcher
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.scheduler.poll_interval = Duration::from_millis(20);
    config.scheduler.shutdown_grace = Duration::from_secs(2);
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(5);
    config
}

/// Helper to create a test NewsletterService with in-memory collaborators.
/// Returns the service, the delivery fake, and the tempdir (which must be kept alive).
pub(crate) async fn create_test_service() -> (NewsletterService, Arc<RecordingDelivery>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let delivery = Arc::new(RecordingDelivery::default());

    let service = NewsletterService::with_collaborators(
        config,
        Collaborators {
            articles: Arc::new(StaticArticles),
            summarizer: Arc::new(StaticSummarizer),
            delivery: delivery.clone(),
        },
    )
    .await
    .unwrap();

    (service, delivery, temp_dir)
}
