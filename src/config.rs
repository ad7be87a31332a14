//! Configuration types for newsletter-scheduler

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Main configuration for [`NewsletterService`](crate::NewsletterService)
///
/// Fields are organized into sub-configs:
/// - [`retry`](RetryConfig) - per-step retry budget
/// - [`persistence`](PersistenceConfig) - database location
/// - [`scheduler`](SchedulerConfig) - dispatcher polling and concurrency
/// - [`news_api`](NewsApiConfig), [`summarizer`](SummarizerConfig),
///   [`delivery`](DeliveryConfig) - the HTTP collaborators
/// - [`notifications`](NotificationConfig) - alert webhooks
/// - [`api`](ApiConfig) - the operational REST surface
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Retry policy applied to every pipeline step
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Dispatcher settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// News article source
    #[serde(default)]
    pub news_api: NewsApiConfig,

    /// Language model used to write the newsletter
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Email transport
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Operator alerts
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Retry configuration for transient step failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts per step, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./newsletter-scheduler.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Dispatcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the dispatcher looks for due runs (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Maximum number of runs executing at once (default: 4)
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// How long shutdown waits for in-flight runs (default: 30 seconds)
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_concurrent_runs: default_max_concurrent_runs(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// News API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewsApiConfig {
    /// Base URL (default: "https://newsapi.org")
    #[serde(default = "default_news_api_url")]
    pub base_url: String,

    /// API key sent as the `apiKey` query parameter
    #[serde(default)]
    pub api_key: Option<String>,

    /// Articles kept per category (default: 5)
    #[serde(default = "default_articles_per_category")]
    pub articles_per_category: usize,

    /// How far back to search for articles (default: 7 days)
    #[serde(default = "default_lookback", with = "duration_serde")]
    pub lookback: Duration,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for NewsApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_news_api_url(),
            api_key: None,
            articles_per_category: default_articles_per_category(),
            lookback: default_lookback(),
            timeout: default_http_timeout(),
        }
    }
}

/// Chat-completions summarizer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Base URL of an OpenAI-compatible API (default: "https://api.openai.com/v1")
    #[serde(default = "default_summarizer_url")]
    pub base_url: String,

    /// Bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name (default: "gpt-4o-mini")
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout (default: 120 seconds)
    #[serde(default = "default_summarizer_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: default_summarizer_url(),
            api_key: None,
            model: default_model(),
            timeout: default_summarizer_timeout(),
        }
    }
}

/// EmailJS delivery configuration
///
/// Every identifier is optional here; a missing one is reported when a send is
/// attempted, so the service can start without email credentials.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Base URL (default: "https://api.emailjs.com")
    #[serde(default = "default_emailjs_url")]
    pub base_url: String,

    /// EmailJS service id
    #[serde(default)]
    pub service_id: Option<String>,

    /// EmailJS template id
    #[serde(default)]
    pub template_id: Option<String>,

    /// EmailJS public key (sent as `user_id`)
    #[serde(default)]
    pub public_key: Option<String>,

    /// EmailJS private key (sent as `accessToken`)
    #[serde(default)]
    pub private_key: Option<String>,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_url: default_emailjs_url(),
            service_id: None,
            template_id: None,
            public_key: None,
            private_key: None,
            timeout: default_http_timeout(),
        }
    }
}

impl DeliveryConfig {
    /// Build from the `EMAILJS_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, secrets file, test map)
    ///
    /// Reads `EMAILJS_SERVICE_ID`, `EMAILJS_TEMPLATE_ID`, `EMAILJS_PUBLIC_KEY` and
    /// `EMAILJS_PRIVATE_KEY`. Older deployments spelled the template variable
    /// `EMAILJS_TEPMLATE_ID`; it is accepted when the correct name is unset.
    /// Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            service_id: get("EMAILJS_SERVICE_ID"),
            template_id: get("EMAILJS_TEMPLATE_ID").or_else(|| get("EMAILJS_TEPMLATE_ID")),
            public_key: get("EMAILJS_PUBLIC_KEY"),
            private_key: get("EMAILJS_PRIVATE_KEY"),
            ..Self::default()
        }
    }
}

/// Operator notification settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook configurations
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// Webhook configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL to POST to
    pub url: String,

    /// Events that trigger this webhook
    pub events: Vec<WebhookEvent>,

    /// Optional authentication header value
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Timeout for webhook requests (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Webhook trigger event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// A run failed after exhausting its step retries
    OnRunFailed,
    /// A user's recurring chain stopped because the next run could not be scheduled
    OnChainBroken,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./newsletter-scheduler.db")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_news_api_url() -> String {
    "https://newsapi.org".to_string()
}

fn default_articles_per_category() -> usize {
    5
}

fn default_lookback() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_summarizer_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_summarizer_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_emailjs_url() -> String {
    "https://api.emailjs.com".to_string()
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
