//! Newsletter daemon example
//!
//! Runs the dispatcher and the REST API in one process until SIGTERM/SIGINT.
//!
//! Configuration is read from the JSON file named by `NEWSLETTER_CONFIG` when set;
//! credentials come from the environment (a `.env` file is honored):
//! - `NEWS_API_KEY` - article source key
//! - `OPENAI_API_KEY` - summarizer key
//! - `EMAILJS_SERVICE_ID`, `EMAILJS_TEMPLATE_ID`, `EMAILJS_PUBLIC_KEY`,
//!   `EMAILJS_PRIVATE_KEY` - email delivery
//!
//! After starting, you can:
//! - View Swagger UI at http://localhost:6790/swagger-ui
//! - Schedule a run via POST http://localhost:6790/events
//! - Stream events via GET http://localhost:6790/events

use newsletter_scheduler::api::start_api_server;
use newsletter_scheduler::config::{Config, DeliveryConfig};
use newsletter_scheduler::{NewsletterService, run_with_shutdown};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match std::env::var("NEWSLETTER_CONFIG") {
        Ok(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        Err(_) => Config::default(),
    };

    if let Ok(key) = std::env::var("NEWS_API_KEY") {
        config.news_api.api_key = Some(key);
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        config.summarizer.api_key = Some(key);
    }

    let delivery = DeliveryConfig::from_env();
    config.delivery = DeliveryConfig {
        service_id: delivery.service_id.or(config.delivery.service_id),
        template_id: delivery.template_id.or(config.delivery.template_id),
        public_key: delivery.public_key.or(config.delivery.public_key),
        private_key: delivery.private_key.or(config.delivery.private_key),
        ..config.delivery
    };

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,newsletter_scheduler=debug")),
        )
        .init();

    let config = load_config()?;
    let service = NewsletterService::new(config.clone()).await?;
    let config = Arc::new(config);

    println!("📰 newsletter-scheduler running");
    println!("📖 Swagger UI: http://{}/swagger-ui", config.api.bind_address);
    println!("🔄 Events stream: http://{}/events", config.api.bind_address);
    println!();
    println!("Example command:");
    println!("  curl -X POST http://{}/events \\", config.api.bind_address);
    println!("    -H 'Content-Type: application/json' \\");
    println!(
        "    -d '{{\"name\": \"newsletter.schedule\", \"data\": {{\"userId\": \"u1\", \"email\": \"me@example.com\", \"categories\": [\"technology\"], \"frequency\": \"daily\", \"scheduledFor\": \"2026-01-01T09:00:00Z\", \"isTest\": true}}}}'"
    );

    let api = tokio::spawn(start_api_server(Arc::new(service.clone()), config));

    run_with_shutdown(service).await?;
    api.abort();

    Ok(())
}
