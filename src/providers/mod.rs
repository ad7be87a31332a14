//! External collaborators of the newsletter pipeline
//!
//! The pipeline only sees the traits in [`traits`]; the concrete HTTP clients
//! ([`NewsApiSource`], [`ChatCompletionsSummarizer`], [`EmailJsChannel`]) and the
//! database-backed [`PreferenceStore`] are wired in by the service.

mod chat;
mod emailjs;
mod news_api;
mod traits;

pub use chat::ChatCompletionsSummarizer;
pub use emailjs::EmailJsChannel;
pub use news_api::NewsApiSource;
pub use traits::{ArticleSource, Completion, DeliveryChannel, DeliveryMetadata, PreferenceStore, Summarizer};

/// Build an HTTP client with the given request timeout
pub(crate) fn http_client(timeout: std::time::Duration) -> crate::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("newsletter-scheduler/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(crate::Error::Network)
}

/// Join `path` onto a configured base URL, keeping any path prefix of the base
pub(crate) fn endpoint(base: &str, path: &str, key: &str) -> crate::Result<url::Url> {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };
    url::Url::parse(&base)
        .and_then(|b| b.join(path.trim_start_matches('/')))
        .map_err(|e| crate::Error::Config {
            message: format!("invalid base URL '{}': {}", base, e),
            key: Some(key.to_string()),
        })
}
