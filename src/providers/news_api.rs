//! News API article source

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;

use super::{ArticleSource, endpoint, http_client};
use crate::config::NewsApiConfig;
use crate::types::Article;
use crate::{Error, Result};

const NO_TITLE: &str = "No title";
const NO_URL: &str = "#";
const NO_DESCRIPTION: &str = "No description available";

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    status: Option<String>,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
struct RawArticle {
    title: Option<String>,
    url: Option<String>,
    description: Option<String>,
}

fn or_default(value: Option<String>, fallback: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

impl From<RawArticle> for Article {
    fn from(raw: RawArticle) -> Self {
        Article {
            title: or_default(raw.title, NO_TITLE),
            url: or_default(raw.url, NO_URL),
            description: or_default(raw.description, NO_DESCRIPTION),
        }
    }
}

/// Article source backed by the `/v2/everything` search endpoint
///
/// Each category is searched for articles published within the configured lookback
/// window, newest first, keeping the first `articles_per_category` results.
pub struct NewsApiSource {
    client: reqwest::Client,
    config: NewsApiConfig,
}

impl NewsApiSource {
    /// Create a new source
    pub fn new(config: NewsApiConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ArticleSource for NewsApiSource {
    async fn fetch_category(&self, category: &str) -> Result<Vec<Article>> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| Error::Config {
            message: "news API key is not configured".into(),
            key: Some("news_api.api_key".into()),
        })?;

        let lookback = chrono::Duration::from_std(self.config.lookback).unwrap_or(chrono::Duration::days(7));
        let since = (Utc::now() - lookback).to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut url = endpoint(&self.config.base_url, "v2/everything", "news_api.base_url")?;
        url.query_pairs_mut()
            .append_pair("q", category)
            .append_pair("from", &since)
            .append_pair("sortBy", "publishedAt")
            .append_pair("apiKey", api_key);

        tracing::debug!(category, "Fetching articles");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream {
                service: "news_api".into(),
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("request failed").to_string(),
            });
        }

        let body: EverythingResponse = response.json().await?;
        if body.status.as_deref() == Some("error") {
            return Err(Error::Upstream {
                service: "news_api".into(),
                status: status.as_u16(),
                message: body.message.unwrap_or_else(|| "unknown error".into()),
            });
        }

        let articles: Vec<Article> = body
            .articles
            .into_iter()
            .take(self.config.articles_per_category)
            .map(Article::from)
            .collect();

        tracing::debug!(category, count = articles.len(), "Fetched articles");
        Ok(articles)
    }
}
