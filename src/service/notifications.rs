//! Alert webhooks for failed runs and broken chains.

use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::config::{WebhookConfig, WebhookEvent};
use crate::types::{Event, WebhookPayload};

use super::NewsletterService;

impl NewsletterService {
    /// Forward `RunFailed` and `ChainBroken` events to the configured webhooks
    ///
    /// Does nothing when no webhooks are configured.
    pub(crate) fn start_alert_forwarder(&self) {
        let webhooks = self.config.notifications.webhooks.clone();
        if webhooks.is_empty() {
            return;
        }

        let mut events = self.event_tx.subscribe();
        let event_tx = self.event_tx.clone();
        let cancel_token = self.lifecycle.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    received = events.recv() => received,
                };

                match event {
                    Ok(event) => {
                        if let Some((event_type, payload)) = alert_for(&event) {
                            trigger_webhooks(&webhooks, event_type, payload, &event_tx);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Alert forwarder lagged behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Alert forwarder stopped");
        });
    }
}

/// Webhook event and payload for events that warrant an alert
pub(crate) fn alert_for(event: &Event) -> Option<(WebhookEvent, WebhookPayload)> {
    let timestamp = chrono::Utc::now().timestamp();
    match event {
        Event::RunFailed {
            run_id,
            user_id,
            step,
            error,
        } => Some((
            WebhookEvent::OnRunFailed,
            WebhookPayload {
                event: "run_failed".to_string(),
                run_id: *run_id,
                user_id: user_id.clone(),
                step: step.clone(),
                error: error.clone(),
                timestamp,
            },
        )),
        Event::ChainBroken {
            run_id,
            user_id,
            error,
        } => Some((
            WebhookEvent::OnChainBroken,
            WebhookPayload {
                event: "chain_broken".to_string(),
                run_id: *run_id,
                user_id: user_id.clone(),
                step: Some(crate::newsletter::STEP_SCHEDULE_NEXT.to_string()),
                error: error.clone(),
                timestamp,
            },
        )),
        _ => None,
    }
}

/// POST `payload` to every webhook subscribed to `event_type`
///
/// Webhooks are sent from a spawned task (fire and forget); failures are logged and
/// broadcast as [`Event::WebhookFailed`].
pub(crate) fn trigger_webhooks(
    webhooks: &[WebhookConfig],
    event_type: WebhookEvent,
    payload: WebhookPayload,
    event_tx: &tokio::sync::broadcast::Sender<Event>,
) {
    let matching: Vec<_> = webhooks
        .iter()
        .filter(|w| w.events.contains(&event_type))
        .cloned()
        .collect();

    if matching.is_empty() {
        return;
    }

    let event_tx = event_tx.clone();
    let payload = Arc::new(payload);

    tokio::spawn(async move {
        let client = reqwest::Client::new();

        for webhook in matching {
            let mut request = client
                .post(&webhook.url)
                .json(payload.as_ref())
                .timeout(webhook.timeout);

            if let Some(auth) = &webhook.auth_header {
                request = request.header("Authorization", auth);
            }

            let url = webhook.url;
            let error_msg = match tokio::time::timeout(webhook.timeout, request.send()).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    tracing::debug!(url = %url, run_id = %payload.run_id, "Alert webhook sent");
                    continue;
                }
                Ok(Ok(response)) => format!(
                    "Webhook returned status {}: {}",
                    response.status(),
                    response.text().await.unwrap_or_default()
                ),
                Ok(Err(e)) => format!("Failed to send webhook: {}", e),
                Err(_) => format!("Webhook timed out after {:?}", webhook.timeout),
            };

            tracing::warn!(url = %url, error = %error_msg, "Alert webhook failed");
            event_tx
                .send(Event::WebhookFailed {
                    url,
                    error: error_msg,
                })
                .ok();
        }
    });
}
