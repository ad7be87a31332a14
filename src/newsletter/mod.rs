//! The five-step newsletter pipeline
//!
//! 1. `check-user-status` re-reads the user's preferences; a paused, deleted or
//!    unreadable subscription ends the run as skipped
//! 2. `fetch-news` collects recent articles for every category
//! 3. `summarize-news` asks the summarizer to write the newsletter
//! 4. `send-email` renders the markdown and delivers it
//! 5. `schedule-next` enqueues the user's next run (not for test runs)
//!
//! Every step runs through [`StepContext::step`], so a re-executed run replays the
//! recorded results and never sends the same newsletter twice.

pub mod prompt;
pub mod render;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::db::{Database, NewNewsletter};
use crate::engine::{Pipeline, StepContext};
use crate::error::{Error, StepError};
use crate::frequency::next_trigger;
use crate::providers::{ArticleSource, DeliveryChannel, DeliveryMetadata, PreferenceStore, Summarizer};
use crate::scheduler::RunScheduler;
use crate::types::{Article, Event, NewsletterResult, RunId, RunPayload, ScheduledRun};

/// Liveness check step
pub const STEP_CHECK_USER_STATUS: &str = "check-user-status";
/// Article collection step
pub const STEP_FETCH_NEWS: &str = "fetch-news";
/// Summarization step
pub const STEP_SUMMARIZE_NEWS: &str = "summarize-news";
/// Delivery step
pub const STEP_SEND_EMAIL: &str = "send-email";
/// Self-rescheduling step
pub const STEP_SCHEDULE_NEXT: &str = "schedule-next";

/// Skip reason recorded for runs of inactive users
pub const PAUSED: &str = "paused";

const DEFAULT_TITLE: &str = "Your Newsletter";

/// Recorded result of the liveness check
#[derive(Clone, Debug, Serialize, Deserialize)]
struct LivenessCheck {
    active: bool,
}

/// Recorded result of a delivery
#[derive(Clone, Debug, Serialize, Deserialize)]
struct DeliveryReceipt {
    recipient: String,
    sent_at: DateTime<Utc>,
}

/// Recorded result of scheduling the follow-up run
#[derive(Clone, Debug, Serialize, Deserialize)]
struct NextRun {
    run_id: RunId,
    trigger_at: DateTime<Utc>,
}

/// Collaborators the pipeline talks to
pub struct NewsletterPipeline {
    preferences: Arc<dyn PreferenceStore>,
    articles: Arc<dyn ArticleSource>,
    summarizer: Arc<dyn Summarizer>,
    delivery: Arc<dyn DeliveryChannel>,
    scheduler: Arc<dyn RunScheduler>,
    history: Option<Arc<Database>>,
    event_tx: broadcast::Sender<Event>,
}

impl NewsletterPipeline {
    /// Create a pipeline over the given collaborators
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        articles: Arc<dyn ArticleSource>,
        summarizer: Arc<dyn Summarizer>,
        delivery: Arc<dyn DeliveryChannel>,
        scheduler: Arc<dyn RunScheduler>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            preferences,
            articles,
            summarizer,
            delivery,
            scheduler,
            history: None,
            event_tx,
        }
    }

    /// Record every delivered newsletter in the `newsletters` table of `db`
    pub fn with_history(mut self, db: Arc<Database>) -> Self {
        self.history = Some(db);
        self
    }

    async fn record_history(&self, run: &ScheduledRun, markdown: &str, article_count: usize) {
        let Some(db) = &self.history else {
            return;
        };

        let title = render::extract_title(markdown).unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let record = NewNewsletter {
            run_id: run.id,
            user_id: &run.user_id,
            title: &title,
            content: markdown,
            categories: &run.payload.categories,
            article_count,
        };

        if let Err(e) = db.insert_newsletter(&record).await {
            tracing::warn!(run_id = %run.id, user_id = %run.user_id, error = %e, "Failed to record newsletter history");
        }
    }
}

#[async_trait]
impl Pipeline for NewsletterPipeline {
    type Output = NewsletterResult;

    fn name(&self) -> &str {
        "newsletter"
    }

    async fn run(&self, run: &ScheduledRun, ctx: &mut StepContext) -> Result<NewsletterResult, StepError> {
        let payload = &run.payload;
        let user_id = run.user_id.as_str();

        let preferences = &self.preferences;
        let liveness: LivenessCheck = ctx
            .step(STEP_CHECK_USER_STATUS, move || async move {
                let active = match preferences.get(user_id).await {
                    Ok(Some(prefs)) => prefs.is_active,
                    Ok(None) => {
                        tracing::info!(user_id = %user_id, "User has no preferences, treating as paused");
                        false
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "Failed to read preferences, treating as paused");
                        false
                    }
                };
                Ok(LivenessCheck { active })
            })
            .await?;

        if !liveness.active {
            return Err(StepError::skip(PAUSED));
        }

        let source = &self.articles;
        let categories = payload.categories.as_slice();
        let articles: Vec<Article> = ctx
            .step(STEP_FETCH_NEWS, move || async move { Ok(source.fetch(categories).await) })
            .await?;
        let article_count = articles.len();
        tracing::debug!(run_id = %run.id, article_count, "Collected articles");

        let summarizer = &self.summarizer;
        let user_prompt = prompt::build_user_prompt(&articles, categories);
        let user_prompt = user_prompt.as_str();
        let markdown: String = ctx
            .step(STEP_SUMMARIZE_NEWS, move || async move {
                let completion = summarizer.infer(prompt::SYSTEM_PROMPT, user_prompt).await?;
                let content = prompt::clean_completion(&completion.content);
                if content.is_empty() {
                    return Err(StepError::Failed(Error::EmptySummary));
                }
                Ok::<_, StepError>(content)
            })
            .await?;

        let delivery = &self.delivery;
        let recipient = payload.email.as_str();
        let html = render::render_html(&markdown);
        let html = html.as_str();
        let metadata = DeliveryMetadata {
            categories: payload.categories.clone(),
            article_count,
            current_date: Local::now().date_naive(),
        };
        let metadata = &metadata;
        let markdown_ref = markdown.as_str();
        let _receipt: DeliveryReceipt = ctx
            .step(STEP_SEND_EMAIL, move || async move {
                delivery.send(recipient, html, metadata).await?;
                self.record_history(run, markdown_ref, article_count).await;
                Ok::<_, StepError>(DeliveryReceipt {
                    recipient: recipient.to_string(),
                    sent_at: Utc::now(),
                })
            })
            .await?;

        let next = if payload.is_test {
            tracing::debug!(run_id = %run.id, "Test run, not scheduling a follow-up");
            None
        } else {
            let scheduler = &self.scheduler;
            let outcome: Result<NextRun, StepError> = ctx
                .step(STEP_SCHEDULE_NEXT, move || async move {
                    let trigger_at = next_trigger(payload.frequency, &Local::now()).with_timezone(&Utc);
                    let next_payload = RunPayload {
                        is_test: false,
                        ..payload.clone()
                    };
                    let run_id = scheduler.schedule(next_payload, trigger_at).await?;
                    Ok::<_, StepError>(NextRun { run_id, trigger_at })
                })
                .await;

            match outcome {
                Ok(next) => Some(next),
                Err(e) => {
                    tracing::error!(
                        run_id = %run.id,
                        user_id = %run.user_id,
                        error = %e,
                        "Failed to schedule next newsletter, chain for this user has ended"
                    );
                    self.event_tx
                        .send(Event::ChainBroken {
                            run_id: run.id,
                            user_id: run.user_id.clone(),
                            error: e.to_string(),
                        })
                        .ok();
                    return Err(e);
                }
            }
        };

        Ok(NewsletterResult {
            success: true,
            content: markdown,
            article_count,
            categories: payload.categories.clone(),
            next_run_id: next.as_ref().map(|n| n.run_id),
            next_run_at: next.map(|n| n.trigger_at),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
