use super::*;
use crate::frequency::Frequency;
use crate::types::{RunPayload, StepStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Two-step pipeline with controllable failures
#[derive(Default)]
struct TestPipeline {
    first_calls: Arc<AtomicU32>,
    second_calls: Arc<AtomicU32>,
    /// Number of transient failures before the second step succeeds
    transient_failures: u32,
    /// Second step fails with a non-retryable error
    fatal: bool,
    /// Skip the run after the first step
    skip: bool,
    /// Declare the first step twice
    duplicate: bool,
}

#[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
struct Output {
    first: u32,
    second: String,
}

#[async_trait]
impl Pipeline for TestPipeline {
    type Output = Output;

    fn name(&self) -> &str {
        "test"
    }

    async fn run(
        &self,
        _run: &ScheduledRun,
        ctx: &mut StepContext,
    ) -> std::result::Result<Output, StepError> {
        let first: u32 = ctx
            .step("first", || {
                let calls = Arc::clone(&self.first_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await?;

        if self.duplicate {
            ctx.step("first", || async { Ok(0u32) }).await?;
        }
        if self.skip {
            return Err(StepError::skip("paused"));
        }

        assert_eq!(ctx.previous::<u32>("first"), Some(7));

        let second: String = ctx
            .step("second", || {
                let calls = Arc::clone(&self.second_calls);
                let transient_failures = self.transient_failures;
                let fatal = self.fatal;
                async move {
                    let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if fatal {
                        return Err(StepError::Fatal("bad input".to_string()));
                    }
                    if call <= transient_failures {
                        return Err(StepError::Failed(Error::Upstream {
                            service: "summarizer".to_string(),
                            status: 503,
                            message: "unavailable".to_string(),
                        }));
                    }
                    Ok(format!("call {}", call))
                }
            })
            .await?;

        Ok(Output { first, second })
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn payload() -> RunPayload {
    RunPayload {
        user_id: "user-1".to_string(),
        email: "user-1@example.com".to_string(),
        categories: vec!["technology".to_string()],
        frequency: Frequency::Weekly,
        is_test: false,
    }
}

async fn setup(max_attempts: u32) -> (StepEngine, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let (event_tx, _) = broadcast::channel(1000);
    let engine = StepEngine::new(Arc::new(db), fast_retry(max_attempts), event_tx);
    (engine, temp_file)
}

async fn due_run(engine: &StepEngine) -> RunId {
    engine
        .db()
        .insert_run(&payload(), Utc::now() - chrono::Duration::seconds(1))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_execute_records_every_step() {
    let (engine, _temp) = setup(3).await;
    let run_id = due_run(&engine).await;
    let pipeline = TestPipeline::default();

    let report = engine.execute(run_id, &pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(
        report.output,
        Some(Output {
            first: 7,
            second: "call 1".to_string()
        })
    );

    let steps = engine.db().list_steps(run_id).await.unwrap();
    let names: Vec<&str> = steps.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);
    assert!(steps.iter().all(|s| s.status == StepStatus::Succeeded));

    let stored = engine.db().get_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Succeeded);
    assert!(stored.finished_at.is_some());
    assert_eq!(stored.result.unwrap()["second"], "call 1");
}

#[tokio::test]
async fn test_interrupted_run_replays_completed_steps() {
    let (engine, _temp) = setup(3).await;
    let run_id = due_run(&engine).await;

    // Process dies after the first step completed
    engine.db().start_run(run_id, Utc::now()).await.unwrap();
    let mut ctx = StepContext::new(
        run_id,
        Arc::clone(engine.db()),
        fast_retry(3),
        engine.event_sender().clone(),
    );
    let first_calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&first_calls);
    let value: u32 = ctx
        .step("first", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }
        })
        .await
        .unwrap();
    assert_eq!(value, 7);
    drop(ctx);

    assert_eq!(engine.db().requeue_interrupted_runs().await.unwrap(), 1);

    let pipeline = TestPipeline {
        first_calls: Arc::clone(&first_calls),
        ..Default::default()
    };
    let mut events = engine.subscribe();
    let report = engine.execute(run_id, &pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.second_calls.load(Ordering::SeqCst), 1);

    let mut replayed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::StepReplayed { step, .. } = event {
            replayed.push(step);
        }
    }
    assert_eq!(replayed, vec!["first".to_string()]);
}

#[tokio::test]
async fn test_transient_failure_retries_only_the_failing_step() {
    let (engine, _temp) = setup(3).await;
    let run_id = due_run(&engine).await;
    let pipeline = TestPipeline {
        transient_failures: 2,
        ..Default::default()
    };
    let mut events = engine.subscribe();

    let report = engine.execute(run_id, &pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(pipeline.first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.second_calls.load(Ordering::SeqCst), 3);

    let record = engine.db().get_step(run_id, "second").await.unwrap().unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(record.status, StepStatus::Succeeded);

    let mut failed_attempts = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::StepAttemptFailed {
            attempt, will_retry, ..
        } = event
        {
            failed_attempts.push((attempt, will_retry));
        }
    }
    assert_eq!(failed_attempts, vec![(1, true), (2, true)]);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let (engine, _temp) = setup(2).await;
    let run_id = due_run(&engine).await;
    let pipeline = TestPipeline {
        transient_failures: 5,
        ..Default::default()
    };

    let report = engine.execute(run_id, &pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_step.as_deref(), Some("second"));
    assert!(report.output.is_none());
    assert_eq!(pipeline.second_calls.load(Ordering::SeqCst), 2);

    let record = engine.db().get_step(run_id, "second").await.unwrap().unwrap();
    assert_eq!(record.status, StepStatus::Failed);
    assert!(record.last_error.unwrap().contains("503"));

    let stored = engine.db().get_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.failed_step.as_deref(), Some("second"));
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let (engine, _temp) = setup(3).await;
    let run_id = due_run(&engine).await;
    let pipeline = TestPipeline {
        fatal: true,
        ..Default::default()
    };
    let mut events = engine.subscribe();

    let report = engine.execute(run_id, &pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error.as_deref(), Some("bad input"));
    assert_eq!(pipeline.second_calls.load(Ordering::SeqCst), 1);

    let mut saw_run_failed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::StepAttemptFailed { will_retry, .. } => assert!(!will_retry),
            Event::RunFailed { step, .. } => {
                assert_eq!(step.as_deref(), Some("second"));
                saw_run_failed = true;
            }
            _ => {}
        }
    }
    assert!(saw_run_failed);
}

#[tokio::test]
async fn test_skip_ends_run_without_later_steps() {
    let (engine, _temp) = setup(3).await;
    let run_id = due_run(&engine).await;
    let pipeline = TestPipeline {
        skip: true,
        ..Default::default()
    };

    let report = engine.execute(run_id, &pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Skipped);
    assert_eq!(report.error.as_deref(), Some("paused"));
    assert_eq!(pipeline.second_calls.load(Ordering::SeqCst), 0);
    assert!(engine.db().get_step(run_id, "second").await.unwrap().is_none());

    let stored = engine.db().get_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Skipped);
}

#[tokio::test]
async fn test_duplicate_step_name_fails_the_run() {
    let (engine, _temp) = setup(3).await;
    let run_id = due_run(&engine).await;
    let pipeline = TestPipeline {
        duplicate: true,
        ..Default::default()
    };

    let report = engine.execute(run_id, &pipeline).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_step.as_deref(), Some("first"));
    assert!(report.error.unwrap().contains("more than once"));
    assert_eq!(pipeline.first_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_finished_run_is_not_executed_again() {
    let (engine, _temp) = setup(3).await;
    let run_id = due_run(&engine).await;
    let pipeline = TestPipeline::default();

    engine.execute(run_id, &pipeline).await.unwrap();
    let again = engine.execute(run_id, &pipeline).await.unwrap();

    assert_eq!(again.status, RunStatus::Succeeded);
    assert_eq!(again.output.unwrap().first, 7);
    assert_eq!(pipeline.first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.second_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_future_run_is_not_due() {
    let (engine, _temp) = setup(3).await;
    let run_id = engine
        .db()
        .insert_run(&payload(), Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    let pipeline = TestPipeline::default();

    let err = engine.execute(run_id, &pipeline).await.unwrap_err();

    assert!(matches!(err, Error::RunNotDue { run_id: id, .. } if id == run_id.0));
    assert_eq!(pipeline.first_calls.load(Ordering::SeqCst), 0);
    let stored = engine.db().get_run(run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Pending);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let (engine, _temp) = setup(3).await;

    let err = engine
        .execute(RunId(4242), &TestPipeline::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_unrecordable_step_result_marks_the_failed_step() {
    let (engine, _temp) = setup(3).await;
    let run_id = due_run(&engine).await;
    engine.db().start_run(run_id, Utc::now()).await.unwrap();
    let mut ctx = StepContext::new(
        run_id,
        Arc::clone(engine.db()),
        fast_retry(3),
        engine.event_sender().clone(),
    );

    // Tuple keys have no JSON representation
    let result = ctx
        .step("pairs", || async {
            let mut pairs = std::collections::HashMap::new();
            pairs.insert((1u8, 2u8), 3u8);
            Ok(pairs)
        })
        .await;

    assert!(result.is_err());
    assert_eq!(ctx.failed_step(), Some("pairs"));
    let record = engine.db().get_step(run_id, "pairs").await.unwrap().unwrap();
    assert_eq!(record.status, StepStatus::Failed);
    assert!(record.last_error.is_some());
}
