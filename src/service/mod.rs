//! Service facade wiring storage, engine, scheduler and dispatcher together
//!
//! Decomposed into focused submodules:
//! - `lifecycle` - startup recovery and graceful shutdown
//! - `notifications` - alert webhooks for failed runs and broken chains

mod lifecycle;
mod notifications;

#[cfg(test)]
pub(crate) mod test_helpers;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::engine::StepEngine;
use crate::error::Result;
use crate::newsletter::NewsletterPipeline;
use crate::providers::{
    ArticleSource, ChatCompletionsSummarizer, DeliveryChannel, EmailJsChannel, NewsApiSource,
    PreferenceStore, Summarizer,
};
use crate::scheduler::Scheduler;
use crate::scheduler_task::SchedulerTask;
use crate::types::{
    Event, NewsletterRecord, RunId, ScheduleEvent, ScheduledRun, StepRecord,
};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// External services used by the newsletter pipeline
#[derive(Clone)]
pub struct Collaborators {
    /// Article source
    pub articles: Arc<dyn ArticleSource>,
    /// Language model
    pub summarizer: Arc<dyn Summarizer>,
    /// Email transport
    pub delivery: Arc<dyn DeliveryChannel>,
}

impl Collaborators {
    /// Build the HTTP clients described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            articles: Arc::new(NewsApiSource::new(config.news_api.clone())?),
            summarizer: Arc::new(ChatCompletionsSummarizer::new(config.summarizer.clone())?),
            delivery: Arc::new(EmailJsChannel::new(config.delivery.clone())?),
        })
    }
}

/// Background tasks owned by the service
#[derive(Clone)]
pub(crate) struct Lifecycle {
    /// Cancels the dispatcher and the alert forwarder
    pub(crate) cancel_token: CancellationToken,
    /// Dispatcher task; resolves to whether in-flight runs drained
    pub(crate) dispatcher: Arc<Mutex<Option<JoinHandle<bool>>>>,
}

/// Newsletter scheduling service (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct NewsletterService {
    /// Database instance for persistence
    /// Public for integration tests to query run status
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Step engine executing runs
    pub(crate) engine: StepEngine,
    /// Scheduler enqueuing runs
    pub(crate) scheduler: Arc<Scheduler>,
    /// The newsletter pipeline
    pub(crate) pipeline: Arc<NewsletterPipeline>,
    /// Background tasks
    pub(crate) lifecycle: Lifecycle,
}

impl NewsletterService {
    /// Create a service using the HTTP collaborators from `config`
    ///
    /// Opens the database, recovers runs interrupted by an unclean shutdown and starts
    /// the dispatcher.
    pub async fn new(config: Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators).await
    }

    /// Create a service with custom collaborators
    pub async fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let config = Arc::new(config);

        let preferences: Arc<dyn PreferenceStore> = db.clone();
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&db),
            Arc::clone(&preferences),
            event_tx.clone(),
        ));
        let pipeline = Arc::new(
            NewsletterPipeline::new(
                preferences,
                collaborators.articles,
                collaborators.summarizer,
                collaborators.delivery,
                scheduler.clone(),
                event_tx.clone(),
            )
            .with_history(Arc::clone(&db)),
        );
        let engine = StepEngine::new(Arc::clone(&db), config.retry.clone(), event_tx.clone());

        let service = Self {
            db,
            event_tx,
            config,
            engine,
            scheduler,
            pipeline,
            lifecycle: Lifecycle {
                cancel_token: CancellationToken::new(),
                dispatcher: Arc::new(Mutex::new(None)),
            },
        };

        service.recover().await?;
        service.start_alert_forwarder();
        service.start_dispatcher().await;

        Ok(service)
    }

    /// Subscribe to run events
    ///
    /// Returns a receiver that will receive all events emitted by the service.
    /// Multiple subscribers can be active at the same time. A receiver that falls
    /// behind by more than the channel capacity skips the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Service configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The scheduler, for enqueuing runs directly
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The step engine, for executing runs outside the dispatcher
    pub fn engine(&self) -> &StepEngine {
        &self.engine
    }

    /// The newsletter pipeline executed for every run
    pub fn pipeline(&self) -> &NewsletterPipeline {
        &self.pipeline
    }

    /// Accept a `newsletter.schedule` event
    pub async fn schedule(&self, event: ScheduleEvent) -> Result<RunId> {
        self.scheduler.accept_event(event).await
    }

    /// Schedule the next run of `user_id` from their stored preferences
    pub async fn reschedule(&self, user_id: &str) -> Result<RunId> {
        self.scheduler.reschedule(user_id).await
    }

    /// Look up a run
    pub async fn get_run(&self, id: RunId) -> Result<Option<ScheduledRun>> {
        self.db.get_run(id).await
    }

    /// Step records of a run
    pub async fn run_steps(&self, id: RunId) -> Result<Vec<StepRecord>> {
        self.db.list_steps(id).await
    }

    /// Most recent newsletters delivered to `user_id`
    pub async fn newsletters(&self, user_id: &str, limit: i64) -> Result<Vec<NewsletterRecord>> {
        self.db.list_newsletters(user_id, limit).await
    }

    async fn start_dispatcher(&self) {
        let task = SchedulerTask::new(
            self.engine.clone(),
            Arc::clone(&self.pipeline),
            self.config.scheduler.clone(),
            self.lifecycle.cancel_token.child_token(),
        );
        let handle = tokio::spawn(task.run());
        *self.lifecycle.dispatcher.lock().await = Some(handle);
    }
}
