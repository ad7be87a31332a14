use super::test_helpers::{RecordingDelivery, StaticArticles, create_test_service, test_config};
use super::*;
use crate::config::{WebhookConfig, WebhookEvent};
use crate::frequency::Frequency;
use crate::providers::Completion;
use crate::types::{PreferenceSnapshot, RunPayload, RunStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::time::timeout;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn prefs(user_id: &str, active: bool) -> PreferenceSnapshot {
    PreferenceSnapshot {
        user_id: user_id.to_string(),
        email: format!("{}@example.com", user_id),
        categories: vec!["technology".to_string()],
        frequency: Frequency::Weekly,
        is_active: active,
    }
}

fn due_event(user_id: &str) -> ScheduleEvent {
    ScheduleEvent {
        user_id: user_id.to_string(),
        email: format!("{}@example.com", user_id),
        categories: vec!["technology".to_string()],
        frequency: Frequency::Weekly,
        scheduled_for: Utc::now() - chrono::Duration::seconds(1),
        is_test: false,
    }
}

async fn wait_for<F>(events: &mut broadcast::Receiver<Event>, mut matches: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event channel error: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_dispatcher_executes_scheduled_event() {
    let (service, delivery, _temp) = create_test_service().await;
    service.db.upsert_preferences(&prefs("alice", true)).await.unwrap();
    let mut events = service.subscribe();

    let run_id = service.schedule(due_event("alice")).await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, Event::RunSucceeded { run_id: id, .. } if *id == run_id)
    })
    .await;

    assert_eq!(
        *delivery.recipients.lock().unwrap(),
        vec!["alice@example.com".to_string()]
    );

    let run = service.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    let steps = service.run_steps(run_id).await.unwrap();
    assert_eq!(steps.len(), 5);

    let history = service.newsletters("alice", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].title, "Daily Digest");

    let runs = service.db.list_runs_for_user("alice").await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().any(|r| r.status == RunStatus::Pending && r.trigger_at > Utc::now()));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_paused_user_run_is_skipped() {
    let (service, delivery, _temp) = create_test_service().await;
    service.db.upsert_preferences(&prefs("bob", false)).await.unwrap();
    let mut events = service.subscribe();

    let run_id = service.schedule(due_event("bob")).await.unwrap();
    let event = wait_for(&mut events, |e| matches!(e, Event::RunSkipped { .. })).await;

    assert!(matches!(event, Event::RunSkipped { run_id: id, ref reason, .. } if id == run_id && reason == "paused"));
    assert!(delivery.recipients.lock().unwrap().is_empty());
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reschedule_requires_preferences() {
    let (service, _delivery, _temp) = create_test_service().await;

    let err = service.reschedule("nobody").await.unwrap_err();
    assert!(matches!(err, crate::Error::NotFound(_)));

    service.db.upsert_preferences(&prefs("carol", true)).await.unwrap();
    let run_id = service.reschedule("carol").await.unwrap();
    let run = service.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    assert!(run.trigger_at > Utc::now());

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_clean_shutdown_is_recorded() {
    let (service, _delivery, _temp) = create_test_service().await;
    let mut events = service.subscribe();

    service.shutdown().await.unwrap();

    assert!(!service.db.was_unclean_shutdown().await.unwrap());
    wait_for(&mut events, |e| matches!(e, Event::Shutdown)).await;
}

#[tokio::test]
async fn test_unclean_shutdown_requeues_interrupted_runs() {
    let temp_dir = tempfile::tempdir().unwrap();
    let collaborators = || Collaborators {
        articles: Arc::new(StaticArticles),
        summarizer: Arc::new(super::test_helpers::StaticSummarizer),
        delivery: Arc::new(RecordingDelivery::default()),
    };

    let first = NewsletterService::with_collaborators(test_config(temp_dir.path()), collaborators())
        .await
        .unwrap();
    let payload = RunPayload {
        user_id: "dave".to_string(),
        email: "dave@example.com".to_string(),
        categories: vec!["technology".to_string()],
        frequency: Frequency::Daily,
        is_test: false,
    };
    // Not due yet, so the dispatcher leaves it alone
    let run_id = first
        .db
        .insert_run(&payload, Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert!(first.db.start_run(run_id, Utc::now()).await.unwrap());

    // Process dies: the dispatcher stops but no clean shutdown is recorded
    first.lifecycle.cancel_token.cancel();
    drop(first);

    let second = NewsletterService::with_collaborators(test_config(temp_dir.path()), collaborators())
        .await
        .unwrap();

    let run = second.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_left_running_after_clean_shutdown_is_requeued() {
    let temp_dir = tempfile::tempdir().unwrap();
    let collaborators = || Collaborators {
        articles: Arc::new(StaticArticles),
        summarizer: Arc::new(super::test_helpers::StaticSummarizer),
        delivery: Arc::new(RecordingDelivery::default()),
    };

    let first = NewsletterService::with_collaborators(test_config(temp_dir.path()), collaborators())
        .await
        .unwrap();
    let payload = RunPayload {
        user_id: "erin".to_string(),
        email: "erin@example.com".to_string(),
        categories: vec!["technology".to_string()],
        frequency: Frequency::Daily,
        is_test: false,
    };
    let run_id = first
        .db
        .insert_run(&payload, Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    // Final status write never landed
    assert!(first.db.start_run(run_id, Utc::now()).await.unwrap());
    first.shutdown().await.unwrap();
    assert!(!first.db.was_unclean_shutdown().await.unwrap());
    drop(first);

    let second = NewsletterService::with_collaborators(test_config(temp_dir.path()), collaborators())
        .await
        .unwrap();

    let run = second.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    second.shutdown().await.unwrap();
}

/// Summarizer producing nothing, so every run fails at summarize-news
struct EmptySummarizer;

#[async_trait]
impl Summarizer for EmptySummarizer {
    async fn infer(&self, _system_prompt: &str, _user_prompt: &str) -> crate::Result<Completion> {
        Ok(Completion {
            content: "   ".to_string(),
        })
    }
}

#[tokio::test]
async fn test_failed_run_fires_alert_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(header("Authorization", "Bearer secret"))
        .and(body_partial_json(serde_json::json!({
            "event": "run_failed",
            "user_id": "erin",
            "step": "summarize-news"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    config.notifications.webhooks = vec![WebhookConfig {
        url: format!("{}/alerts", server.uri()),
        events: vec![WebhookEvent::OnRunFailed],
        auth_header: Some("Bearer secret".to_string()),
        timeout: Duration::from_secs(5),
    }];
    let service = NewsletterService::with_collaborators(
        config,
        Collaborators {
            articles: Arc::new(StaticArticles),
            summarizer: Arc::new(EmptySummarizer),
            delivery: Arc::new(RecordingDelivery::default()),
        },
    )
    .await
    .unwrap();
    service.db.upsert_preferences(&prefs("erin", true)).await.unwrap();
    let mut events = service.subscribe();

    service.schedule(due_event("erin")).await.unwrap();
    wait_for(&mut events, |e| matches!(e, Event::RunFailed { .. })).await;

    for _ in 0..100 {
        if !server.received_requests().await.unwrap_or_default().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    service.shutdown().await.unwrap();
    server.verify().await;
}

#[test]
fn test_alert_for_ignores_routine_events() {
    let succeeded = Event::RunSucceeded {
        run_id: RunId(1),
        user_id: "u".to_string(),
    };
    assert!(notifications::alert_for(&succeeded).is_none());

    let broken = Event::ChainBroken {
        run_id: RunId(2),
        user_id: "u".to_string(),
        error: "queue unavailable".to_string(),
    };
    let (event_type, payload) = notifications::alert_for(&broken).unwrap();
    assert_eq!(event_type, WebhookEvent::OnChainBroken);
    assert_eq!(payload.event, "chain_broken");
    assert_eq!(payload.step.as_deref(), Some("schedule-next"));
    assert_eq!(payload.run_id, RunId(2));
}
