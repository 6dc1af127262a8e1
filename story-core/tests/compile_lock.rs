//! Compile lock behavior through the public compile entry point.

use std::sync::Arc;
use std::time::Duration;
use story_core::clock::Clock;
use story_core::lock::{CompileLock, LockAttempt};
use story_core::session::{Phase, SessionUpdate};
use story_core::story::Enrichment;
use story_core::testing::{assert_phase, replies, sample_story, StaticJob, TestHarness, SESSION_ID};
use story_core::{
    AdvanceResponse, CompileOutcome, CompileRequest, CompileResponse, DocumentStore,
    EnrichmentJob, EnrichmentStatus, JobKind, PhaseOutput,
};

/// Drive the seeded session to the point where only the compile is left.
async fn ready_to_compile(harness: &TestHarness) {
    harness.reach_synopses(&["char-7"]).await;
    harness
        .store
        .update_session(
            SESSION_ID,
            SessionUpdate::new()
                .selected_synopsis(Some("A".to_string()))
                .phase(Phase::StoryGeneration),
        )
        .await
        .unwrap();
}

fn foreign_lock(harness: &TestHarness) -> CompileLock {
    CompileLock::new(
        harness.store.clone(),
        harness.clock.clone(),
        harness.workflow.config().lock_timeout,
    )
}

#[tokio::test]
async fn test_compile_refused_while_another_request_holds_lock() {
    let harness = TestHarness::new().await;
    ready_to_compile(&harness).await;

    let lock = foreign_lock(&harness);
    assert!(matches!(
        lock.try_acquire(SESSION_ID, "other-request").await.unwrap(),
        LockAttempt::Acquired
    ));

    harness.clock.advance(Duration::from_secs(119));
    let report = harness
        .workflow
        .compile(CompileRequest::new(SESSION_ID).with_request_id("mine"))
        .await;
    assert!(matches!(report.outcome, CompileOutcome::InProgress));
    assert!(report.enrichment.is_none());

    let response = CompileResponse::from(&report.outcome);
    assert_eq!(response.status_code(), 409);
    assert!(response.already_in_progress);

    // The advance path reports the same conflict with its own flag.
    let output = harness.advance(harness.request()).await;
    let envelope = serde_json::to_value(AdvanceResponse::from(output)).unwrap();
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["in_progress"], true);

    assert_eq!(harness.model.calls_for("write_story"), 0);
    let session = harness.session().await;
    assert_eq!(session.compile_request_id.as_deref(), Some("other-request"));
}

#[tokio::test]
async fn test_stale_lock_is_taken_over_after_window() {
    let harness = TestHarness::new().await;
    ready_to_compile(&harness).await;

    foreign_lock(&harness)
        .try_acquire(SESSION_ID, "crashed-request")
        .await
        .unwrap();
    harness.clock.advance(Duration::from_secs(121));

    harness.model.push("write_story", replies::whiskers_story());
    let report = harness
        .workflow
        .compile(CompileRequest::new(SESSION_ID).with_request_id("mine"))
        .await;

    assert!(matches!(report.outcome, CompileOutcome::Compiled(_)));
    let session = harness.session().await;
    assert_eq!(session.compile_request_id.as_deref(), Some("mine"));
    assert!(!session.compile_in_progress);
    assert_phase(&session, Phase::Complete);
}

#[tokio::test]
async fn test_takeover_keeps_story_written_by_slow_holder() {
    let narration: Arc<dyn EnrichmentJob> = Arc::new(StaticJob::ok(JobKind::Narration, "n.mp3"));
    let harness = TestHarness::with_jobs(vec![narration]).await;
    ready_to_compile(&harness).await;

    let slow = foreign_lock(&harness);
    slow.try_acquire(SESSION_ID, "slow-request").await.unwrap();
    harness.clock.advance(Duration::from_secs(121));

    // The slow holder stored its story and its narration finished, but it
    // has not marked the session complete yet.
    let mut original = sample_story(SESSION_ID);
    original.narration =
        Enrichment::ready("https://cdn.example/original.mp3", harness.clock.now());
    harness.store.put_story(original.clone()).await.unwrap();

    harness.model.push("write_story", replies::whiskers_story());
    let report = harness
        .workflow
        .compile(CompileRequest::new(SESSION_ID).with_request_id("takeover"))
        .await;

    match &report.outcome {
        CompileOutcome::AlreadyCompleted(story) => assert_eq!(story.text, original.text),
        other => panic!("expected AlreadyCompleted, got {other:?}"),
    }
    assert!(report.enrichment.is_none());
    assert_eq!(harness.model.calls_for("write_story"), 1);

    let stored = harness.story().await.unwrap();
    assert_eq!(stored.text, original.text);
    assert_eq!(stored.narration.status, EnrichmentStatus::Ready);
    assert_eq!(
        stored.narration.output.as_deref(),
        Some("https://cdn.example/original.mp3")
    );

    let session = harness.session().await;
    assert_phase(&session, Phase::Complete);
    assert!(!session.compile_in_progress);

    // The slow holder's own release no longer touches the session lock.
    assert!(!slow.release(SESSION_ID, "slow-request", None).await.unwrap());
}

#[tokio::test]
async fn test_completed_session_replays_existing_story() {
    let harness = TestHarness::new().await;
    ready_to_compile(&harness).await;
    harness.model.push("write_story", replies::whiskers_story());

    let first = harness.workflow.compile(CompileRequest::new(SESSION_ID)).await;
    let second = harness.workflow.compile(CompileRequest::new(SESSION_ID)).await;

    let first_story = match first.outcome {
        CompileOutcome::Compiled(story) => story,
        other => panic!("expected Compiled, got {other:?}"),
    };
    match &second.outcome {
        CompileOutcome::AlreadyCompleted(story) => {
            assert_eq!(story.text, first_story.text);
            assert_eq!(story.created_at, first_story.created_at);
        }
        other => panic!("expected AlreadyCompleted, got {other:?}"),
    }

    let response = CompileResponse::from(&second.outcome);
    assert!(response.ok && response.already_completed);
    assert_eq!(response.artifact_id.as_deref(), Some(SESSION_ID));
    assert_eq!(harness.model.calls_for("write_story"), 1);
}

#[tokio::test]
async fn test_failed_compile_releases_lock_and_records_error() {
    let harness = TestHarness::new().await;
    ready_to_compile(&harness).await;
    harness.model.push_failure("write_story", "context window exceeded");

    let report = harness.workflow.compile(CompileRequest::new(SESSION_ID)).await;
    let message = match &report.outcome {
        CompileOutcome::Failed(message) => message.clone(),
        other => panic!("expected Failed, got {other:?}"),
    };
    assert!(!message.contains("context window"));
    assert_eq!(CompileResponse::from(&report.outcome).status_code(), 500);

    let session = harness.session().await;
    assert!(!session.compile_in_progress);
    assert!(session
        .last_error
        .as_deref()
        .unwrap_or("")
        .contains("context window exceeded"));
    assert_phase(&session, Phase::StoryGeneration);
    assert!(harness.story().await.is_none());

    // An immediate retry is not blocked by the failed attempt.
    harness.model.push("write_story", replies::whiskers_story());
    let output = harness.advance(harness.request()).await;
    assert!(matches!(output, PhaseOutput::Finished { .. }));
}

#[tokio::test]
async fn test_compile_without_synopsis_fails_cleanly() {
    let harness = TestHarness::new().await;
    harness.reach_synopses(&["char-7"]).await;

    let report = harness.workflow.compile(CompileRequest::new(SESSION_ID)).await;
    match &report.outcome {
        CompileOutcome::Failed(message) => assert!(message.contains("Pick a plot")),
        other => panic!("expected Failed, got {other:?}"),
    }
    let session = harness.session().await;
    assert!(!session.compile_in_progress);
    assert_phase(&session, Phase::SynopsisSelection);
}

#[tokio::test]
async fn test_style_override_is_stored() {
    let harness = TestHarness::new().await;
    ready_to_compile(&harness).await;
    harness.model.push("write_story", replies::whiskers_story());

    harness
        .workflow
        .compile(CompileRequest::new(SESSION_ID).with_style("watercolor"))
        .await;

    let story = harness.story().await.unwrap();
    assert_eq!(story.style_id.as_deref(), Some("watercolor"));
    assert_eq!(harness.session().await.style_id.as_deref(), Some("watercolor"));
    let call = harness.model.calls().pop().unwrap();
    assert!(call.prompt.contains("'watercolor' style"));
}

#[tokio::test]
async fn test_racing_compiles_run_the_model_once() {
    let harness = Arc::new(TestHarness::new().await);
    ready_to_compile(&harness).await;
    harness.model.push("write_story", replies::whiskers_story());
    harness.model.push("write_story", replies::whiskers_story());

    let a = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .workflow
                .compile(CompileRequest::new(SESSION_ID))
                .await
                .outcome
        })
    };
    let b = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .workflow
                .compile(CompileRequest::new(SESSION_ID))
                .await
                .outcome
        })
    };
    let outcomes = [a.await.unwrap(), b.await.unwrap()];

    let compiled = outcomes
        .iter()
        .filter(|o| matches!(o, CompileOutcome::Compiled(_)))
        .count();
    assert_eq!(compiled, 1);
    assert_eq!(harness.model.calls_for("write_story"), 1);
}
