//! EmailJS delivery channel

use async_trait::async_trait;
use serde::Serialize;

use super::{DeliveryChannel, DeliveryMetadata, endpoint, http_client};
use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::Result;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    #[serde(rename = "accessToken")]
    access_token: &'a str,
    template_params: TemplateParams<'a>,
}

#[derive(Debug, Serialize)]
struct TemplateParams<'a> {
    email: &'a str,
    categories: String,
    article_count: usize,
    current_date: String,
    newsletter_content: &'a str,
}

/// Delivery channel posting to the EmailJS REST API
///
/// Credentials are checked on every send, so a service started without them
/// fails each delivery with [`DeliveryError::MissingConfiguration`] instead of
/// refusing to start.
pub struct EmailJsChannel {
    client: reqwest::Client,
    config: DeliveryConfig,
}

impl EmailJsChannel {
    /// Create a new channel
    pub fn new(config: DeliveryConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { client, config })
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> std::result::Result<&'a str, DeliveryError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| DeliveryError::MissingConfiguration {
            field: field.to_string(),
        })
}

#[async_trait]
impl DeliveryChannel for EmailJsChannel {
    async fn send(&self, recipient: &str, rendered_content: &str, metadata: &DeliveryMetadata) -> Result<()> {
        let request = SendRequest {
            service_id: required(&self.config.service_id, "service_id")?,
            template_id: required(&self.config.template_id, "template_id")?,
            user_id: required(&self.config.public_key, "public_key")?,
            access_token: required(&self.config.private_key, "private_key")?,
            template_params: TemplateParams {
                email: recipient,
                categories: metadata.categories_label(),
                article_count: metadata.article_count,
                current_date: metadata.date_label(),
                newsletter_content: rendered_content,
            },
        };

        let url = endpoint(&self.config.base_url, "api/v1.0/email/send", "delivery.base_url")?;
        let response = self.client.post(url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        tracing::debug!(recipient, "Email accepted by transport");
        Ok(())
    }
}
