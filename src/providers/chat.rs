//! OpenAI-compatible chat-completions summarizer

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Completion, Summarizer, endpoint, http_client};
use crate::config::SummarizerConfig;
use crate::{Error, Result};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Summarizer speaking the `POST /chat/completions` protocol
pub struct ChatCompletionsSummarizer {
    client: reqwest::Client,
    config: SummarizerConfig,
}

impl ChatCompletionsSummarizer {
    /// Create a new summarizer
    pub fn new(config: SummarizerConfig) -> Result<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Summarizer for ChatCompletionsSummarizer {
    async fn infer(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        let url = endpoint(&self.config.base_url, "chat/completions", "summarizer.base_url")?;
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let mut builder = self.client.post(url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                service: "summarizer".into(),
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(Completion { content })
    }
}
