use super::*;
use crate::Result;
use crate::config::RetryConfig;
use crate::engine::StepEngine;
use crate::error::DeliveryError;
use crate::frequency::Frequency;
use crate::providers::Completion;
use crate::scheduler::Scheduler;
use crate::types::{PreferenceSnapshot, RunStatus, StepStatus};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;


const NEWSLETTER: &str = "# Tech Weekly\n\n## Technology\n\n- **Chips** are faster.\n";

fn article(n: u32) -> Article {
    Article {
        title: format!("Story {}", n),
        url: format!("https://news.example.com/{}", n),
        description: format!("Description {}", n),
    }
}

/// Article source returning canned articles per category
#[derive(Default)]
struct FakeArticles {
    by_category: HashMap<String, Vec<Article>>,
    failing: Vec<String>,
    calls: AtomicU32,
}

#[async_trait]
impl ArticleSource for FakeArticles {
    async fn fetch_category(&self, category: &str) -> Result<Vec<Article>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|c| c == category) {
            return Err(Error::Upstream {
                service: "news".to_string(),
                status: 500,
                message: "boom".to_string(),
            });
        }
        Ok(self.by_category.get(category).cloned().unwrap_or_default())
    }
}

/// Summarizer returning fixed content and remembering prompts
struct FakeSummarizer {
    content: String,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl FakeSummarizer {
    fn returning(content: &str) -> Self {
        Self {
            content: content.to_string(),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn infer(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        assert_eq!(system_prompt, prompt::SYSTEM_PROMPT);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user_prompt.to_string());
        Ok(Completion {
            content: self.content.clone(),
        })
    }
}

/// Delivery channel recording sent emails
#[derive(Default)]
struct FakeDelivery {
    sent: Mutex<Vec<(String, String, DeliveryMetadata)>>,
    attempts: AtomicU32,
    missing_configuration: bool,
    /// Number of transient rejections before accepting
    rejections: u32,
    /// Never complete the next send, as if the process died mid-request
    hang_next: AtomicBool,
}

#[async_trait]
impl DeliveryChannel for FakeDelivery {
    async fn send(&self, recipient: &str, rendered_content: &str, metadata: &DeliveryMetadata) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_next.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.missing_configuration {
            return Err(DeliveryError::MissingConfiguration {
                field: "service_id".to_string(),
            }
            .into());
        }
        if attempt <= self.rejections {
            return Err(DeliveryError::Rejected {
                status: 503,
                body: "try later".to_string(),
            }
            .into());
        }
        self.sent.lock().unwrap().push((
            recipient.to_string(),
            rendered_content.to_string(),
            metadata.clone(),
        ));
        Ok(())
    }
}

impl FakeDelivery {
    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

/// Run scheduler that can hang once or always fail
struct ControlledScheduler {
    inner: Scheduler,
    hang_next: AtomicBool,
    always_fail: bool,
}

#[async_trait]
impl RunScheduler for ControlledScheduler {
    async fn schedule(&self, payload: RunPayload, trigger_at: DateTime<Utc>) -> Result<RunId> {
        if self.hang_next.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.always_fail {
            return Err(Error::Other("queue unavailable".to_string()));
        }
        self.inner.schedule_run(&payload, trigger_at).await
    }
}

struct Harness {
    engine: StepEngine,
    db: Arc<Database>,
    articles: Arc<FakeArticles>,
    summarizer: Arc<FakeSummarizer>,
    delivery: Arc<FakeDelivery>,
    scheduler: Arc<ControlledScheduler>,
    pipeline: NewsletterPipeline,
    _temp: NamedTempFile,
}

struct Setup {
    articles: FakeArticles,
    summarizer: FakeSummarizer,
    delivery: FakeDelivery,
    scheduler_fails: bool,
}

impl Default for Setup {
    fn default() -> Self {
        let mut by_category = HashMap::new();
        by_category.insert("technology".to_string(), vec![article(1), article(2)]);
        Self {
            articles: FakeArticles {
                by_category,
                ..Default::default()
            },
            summarizer: FakeSummarizer::returning(NEWSLETTER),
            delivery: FakeDelivery::default(),
            scheduler_fails: false,
        }
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

async fn harness(setup: Setup) -> Harness {
    let temp = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp.path()).await.unwrap());
    let (event_tx, _) = broadcast::channel(1000);

    let preferences: Arc<dyn PreferenceStore> = db.clone();
    let articles = Arc::new(setup.articles);
    let summarizer = Arc::new(setup.summarizer);
    let delivery = Arc::new(setup.delivery);
    let scheduler = Arc::new(ControlledScheduler {
        inner: Scheduler::new(Arc::clone(&db), Arc::clone(&preferences), event_tx.clone()),
        hang_next: AtomicBool::new(false),
        always_fail: setup.scheduler_fails,
    });

    let pipeline = NewsletterPipeline::new(
        preferences,
        articles.clone(),
        summarizer.clone(),
        delivery.clone(),
        scheduler.clone(),
        event_tx.clone(),
    )
    .with_history(Arc::clone(&db));
    let engine = StepEngine::new(Arc::clone(&db), fast_retry(), event_tx);

    Harness {
        engine,
        db,
        articles,
        summarizer,
        delivery,
        scheduler,
        pipeline,
        _temp: temp,
    }
}

impl Harness {
    async fn subscribe_user(&self, user_id: &str, active: bool) {
        self.db
            .upsert_preferences(&PreferenceSnapshot {
                user_id: user_id.to_string(),
                email: format!("{}@example.com", user_id),
                categories: vec!["technology".to_string()],
                frequency: Frequency::Weekly,
                is_active: active,
            })
            .await
            .unwrap();
    }

    async fn due_run(&self, user_id: &str, is_test: bool) -> RunId {
        let payload = RunPayload {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            categories: vec!["technology".to_string()],
            frequency: Frequency::Weekly,
            is_test,
        };
        self.db
            .insert_run(&payload, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap()
    }

    /// Execute a run but abandon it after a short while, like a crashed process
    async fn execute_until_crash(&self, run_id: RunId) {
        let result = tokio::time::timeout(
            Duration::from_millis(200),
            self.engine.execute(run_id, &self.pipeline),
        )
        .await;
        assert!(result.is_err(), "run was expected to hang");
        assert_eq!(self.db.requeue_interrupted_runs().await.unwrap(), 1);
    }

    async fn follow_up_runs(&self, user_id: &str, run_id: RunId) -> Vec<ScheduledRun> {
        self.db
            .list_runs_for_user(user_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.id != run_id)
            .collect()
    }
}

#[tokio::test]
async fn test_weekly_run_sends_one_email_and_schedules_next_week() {
    let h = harness(Setup::default()).await;
    h.subscribe_user("alice", true).await;
    let run_id = h.due_run("alice", false).await;

    let before = Local::now();
    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();
    let after = Local::now();

    assert_eq!(report.status, RunStatus::Succeeded);
    let result = report.output.unwrap();
    assert!(result.success);
    assert_eq!(result.article_count, 2);
    assert_eq!(result.categories, vec!["technology".to_string()]);
    assert_eq!(result.content, NEWSLETTER.trim());

    let sent = h.delivery.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let (recipient, html, metadata) = &sent[0];
    assert_eq!(recipient, "alice@example.com");
    assert!(html.contains("<h1>Tech Weekly</h1>"));
    assert_eq!(metadata.article_count, 2);
    assert_eq!(metadata.categories_label(), "technology");

    let follow_ups = h.follow_up_runs("alice", run_id).await;
    assert_eq!(follow_ups.len(), 1);
    let next = &follow_ups[0];
    assert_eq!(next.status, RunStatus::Pending);
    assert_eq!(Some(next.id), result.next_run_id);
    let lower = next_trigger(Frequency::Weekly, &before).with_timezone(&Utc);
    let upper = next_trigger(Frequency::Weekly, &after).with_timezone(&Utc);
    assert!(next.trigger_at >= lower && next.trigger_at <= upper);
    assert_eq!(next.payload.categories, vec!["technology".to_string()]);

    let history = h.db.list_newsletters("alice", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].title, "Tech Weekly");
    assert_eq!(history[0].article_count, 2);
}

#[tokio::test]
async fn test_inactive_user_is_skipped_before_any_work() {
    let h = harness(Setup::default()).await;
    h.subscribe_user("bob", false).await;
    let run_id = h.due_run("bob", false).await;

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Skipped);
    assert_eq!(report.error.as_deref(), Some(PAUSED));
    assert_eq!(h.articles.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.delivery.attempts.load(Ordering::SeqCst), 0);
    assert!(h.follow_up_runs("bob", run_id).await.is_empty());
}

#[tokio::test]
async fn test_missing_preferences_count_as_paused() {
    let h = harness(Setup::default()).await;
    let run_id = h.due_run("deleted-user", false).await;

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Skipped);
    assert_eq!(h.articles.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_recorded_articles_are_not_fetched_again() {
    let h = harness(Setup::default()).await;
    h.subscribe_user("carol", true).await;
    let run_id = h.due_run("carol", false).await;

    // A previous execution got through fetch-news with three articles
    let recorded = vec![article(10), article(11), article(12)];
    h.db.start_run(run_id, Utc::now()).await.unwrap();
    for (name, value) in [
        (STEP_CHECK_USER_STATUS, serde_json::json!({ "active": true })),
        (STEP_FETCH_NEWS, serde_json::to_value(&recorded).unwrap()),
    ] {
        h.db.start_step_attempt(run_id, name).await.unwrap();
        h.db.complete_step(run_id, name, &value).await.unwrap();
    }
    h.db.requeue_interrupted_runs().await.unwrap();

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(h.articles.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.output.unwrap().article_count, 3);

    let prompts = h.summarizer.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    for a in &recorded {
        assert!(prompts[0].contains(&a.title));
    }
}

#[tokio::test]
async fn test_empty_summary_fails_without_sending() {
    let h = harness(Setup {
        summarizer: FakeSummarizer::returning("```markdown\n\n```"),
        ..Default::default()
    })
    .await;
    h.subscribe_user("dave", true).await;
    let run_id = h.due_run("dave", false).await;

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_step.as_deref(), Some(STEP_SUMMARIZE_NEWS));
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.delivery.attempts.load(Ordering::SeqCst), 0);
    assert!(h.follow_up_runs("dave", run_id).await.is_empty());
}

#[tokio::test]
async fn test_crashes_around_delivery_never_duplicate_email() {
    let h = harness(Setup::default()).await;
    h.subscribe_user("erin", true).await;
    let run_id = h.due_run("erin", false).await;

    // Crash after summarize-news, while the email is being sent
    h.delivery.hang_next.store(true, Ordering::SeqCst);
    h.execute_until_crash(run_id).await;
    assert_eq!(h.delivery.sent_count(), 0);

    // Crash after send-email, while the next run is being scheduled
    h.scheduler.hang_next.store(true, Ordering::SeqCst);
    h.execute_until_crash(run_id).await;
    assert_eq!(h.delivery.sent_count(), 1);

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(h.delivery.sent_count(), 1);
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.articles.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.follow_up_runs("erin", run_id).await.len(), 1);

    let send = h.db.get_step(run_id, STEP_SEND_EMAIL).await.unwrap().unwrap();
    assert_eq!(send.status, StepStatus::Succeeded);
    assert_eq!(send.attempts, 2);
}

#[tokio::test]
async fn test_two_due_runs_for_one_user_both_execute() {
    let h = harness(Setup::default()).await;
    h.subscribe_user("frank", true).await;
    let first = h.due_run("frank", false).await;
    let second = h.due_run("frank", false).await;

    let (a, b) = tokio::join!(
        h.engine.execute(first, &h.pipeline),
        h.engine.execute(second, &h.pipeline)
    );

    assert_eq!(a.unwrap().status, RunStatus::Succeeded);
    assert_eq!(b.unwrap().status, RunStatus::Succeeded);
    assert_eq!(h.delivery.sent_count(), 2);
    assert_eq!(h.db.list_runs_for_user("frank").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_missing_delivery_credentials_fail_after_one_attempt() {
    let h = harness(Setup {
        delivery: FakeDelivery {
            missing_configuration: true,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;
    h.subscribe_user("gina", true).await;
    let run_id = h.due_run("gina", false).await;

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_step.as_deref(), Some(STEP_SEND_EMAIL));
    assert!(report.error.unwrap().contains("service_id"));
    assert_eq!(h.delivery.attempts.load(Ordering::SeqCst), 1);
    assert!(h.follow_up_runs("gina", run_id).await.is_empty());
    assert!(h.db.list_newsletters("gina", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_rejection_retries_send_only() {
    let h = harness(Setup {
        delivery: FakeDelivery {
            rejections: 2,
            ..Default::default()
        },
        ..Default::default()
    })
    .await;
    h.subscribe_user("hank", true).await;
    let run_id = h.due_run("hank", false).await;

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(h.delivery.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(h.delivery.sent_count(), 1);
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_test_run_does_not_reschedule() {
    let h = harness(Setup::default()).await;
    h.subscribe_user("ivy", true).await;
    let run_id = h.due_run("ivy", true).await;

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let result = report.output.unwrap();
    assert!(result.next_run_id.is_none());
    assert!(result.next_run_at.is_none());
    assert_eq!(h.delivery.sent_count(), 1);
    assert!(h.follow_up_runs("ivy", run_id).await.is_empty());
    assert!(h.db.get_step(run_id, STEP_SCHEDULE_NEXT).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reschedule_failure_reports_broken_chain() {
    let h = harness(Setup {
        scheduler_fails: true,
        ..Default::default()
    })
    .await;
    h.subscribe_user("jack", true).await;
    let run_id = h.due_run("jack", false).await;
    let mut events = h.engine.subscribe();

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_step.as_deref(), Some(STEP_SCHEDULE_NEXT));
    assert_eq!(h.delivery.sent_count(), 1);

    let mut chain_broken = false;
    while let Ok(event) = events.try_recv() {
        if let Event::ChainBroken {
            run_id: id, user_id, ..
        } = event
        {
            assert_eq!(id, run_id);
            assert_eq!(user_id, "jack");
            chain_broken = true;
        }
    }
    assert!(chain_broken);
}

#[tokio::test]
async fn test_failing_category_degrades_to_fewer_articles() {
    let mut setup = Setup::default();
    setup
        .articles
        .by_category
        .insert("business".to_string(), vec![article(5)]);
    setup.articles.failing.push("technology".to_string());
    let h = harness(setup).await;
    h.db
        .upsert_preferences(&PreferenceSnapshot {
            user_id: "kate".to_string(),
            email: "kate@example.com".to_string(),
            categories: vec!["technology".to_string(), "business".to_string()],
            frequency: Frequency::Daily,
            is_active: true,
        })
        .await
        .unwrap();
    let payload = RunPayload {
        user_id: "kate".to_string(),
        email: "kate@example.com".to_string(),
        categories: vec!["technology".to_string(), "business".to_string()],
        frequency: Frequency::Daily,
        is_test: true,
    };
    let run_id = h
        .db
        .insert_run(&payload, Utc::now() - chrono::Duration::seconds(1))
        .await
        .unwrap();

    let report = h.engine.execute(run_id, &h.pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.output.unwrap().article_count, 1);
    assert_eq!(h.articles.calls.load(Ordering::SeqCst), 2);
}
