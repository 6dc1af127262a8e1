//! Testing utilities for the story workflow.
//!
//! This module provides tools for integration testing:
//! - `MockModel` for deterministic runs without API calls
//! - `ManualClock` for driving lock staleness by hand
//! - `TestHarness` with a seeded family and an engine wired to both
//! - Assertion helpers for phase outputs and session state

use crate::clock::Clock;
use crate::config::WorkflowConfig;
use crate::enrich::{EnrichmentJob, Enricher, JobError};
use crate::entity::{Character, ChildProfile};
use crate::model::{ModelCall, ModelClient, ModelError};
use crate::placeholder;
use crate::session::{Phase, Session};
use crate::store::{DocumentStore, MemoryStore};
use crate::story::{Enrichment, JobKind, Story};
use crate::workflow::{AdvanceRequest, PhaseOutput, StoryWorkflow};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const OWNER_ID: &str = "owner-1";
pub const CHILD_ID: &str = "child-1";
pub const SESSION_ID: &str = "session-1";

/// A model that returns scripted responses.
///
/// Responses are queued per contract name, so a test scripts "the next
/// scenario batch" without caring about call order across steps. A call
/// with nothing queued fails as if the model were unavailable.
#[derive(Default)]
pub struct MockModel {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, String>>>>,
    calls: Mutex<Vec<ModelCall>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for a contract.
    pub fn push(&self, contract: &str, response: Value) {
        self.enqueue(contract, Ok(response));
    }

    /// Queue a failure for a contract.
    pub fn push_failure(&self, contract: &str, message: &str) {
        self.enqueue(contract, Err(message.to_string()));
    }

    fn enqueue(&self, contract: &str, entry: Result<Value, String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.entry(contract.to_string()).or_default().push_back(entry);
        }
    }

    /// Every call received, oldest first.
    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    /// Number of calls made for one contract.
    pub fn calls_for(&self, contract: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.contract_name() == contract)
            .count()
    }

    /// Responses still queued across all contracts.
    pub fn pending(&self) -> usize {
        self.responses
            .lock()
            .map(|r| r.values().map(VecDeque::len).sum())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn invoke(&self, call: &ModelCall) -> Result<Value, ModelError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.clone());
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut r| r.get_mut(call.contract_name()).and_then(VecDeque::pop_front));
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(ModelError::Unavailable(message)),
            None => Err(ModelError::Unavailable(format!(
                "no scripted response for '{}'",
                call.contract_name()
            ))),
        }
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Start at 2026-01-01T09:00:00Z.
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::starting_at(start)
    }

    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(at),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }
}

/// An enrichment job with a fixed outcome.
pub struct StaticJob {
    kind: JobKind,
    outcome: StaticOutcome,
}

enum StaticOutcome {
    Ready(String),
    Fail(String),
    Panic,
}

impl StaticJob {
    pub fn ok(kind: JobKind, output: impl Into<String>) -> Self {
        Self {
            kind,
            outcome: StaticOutcome::Ready(output.into()),
        }
    }

    pub fn failing(kind: JobKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            outcome: StaticOutcome::Fail(message.into()),
        }
    }

    pub fn panicking(kind: JobKind) -> Self {
        Self {
            kind,
            outcome: StaticOutcome::Panic,
        }
    }
}

#[async_trait]
impl EnrichmentJob for StaticJob {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn run(&self, _story: &Story) -> Result<String, JobError> {
        match &self.outcome {
            StaticOutcome::Ready(output) => Ok(output.clone()),
            StaticOutcome::Fail(message) => Err(JobError::Failed(message.clone())),
            StaticOutcome::Panic => panic!("{} job blew up", self.kind.name()),
        }
    }
}

/// A compiled story with idle enrichments.
pub fn sample_story(id: &str) -> Story {
    Story {
        id: id.to_string(),
        child_id: CHILD_ID.to_string(),
        title: "Mia and the Moon Boat".to_string(),
        mood: "cozy".to_string(),
        text: "Mia and Captain Whiskers sailed to the moon.".to_string(),
        participant_ids: vec![CHILD_ID.to_string(), "char-7".to_string()],
        style_id: None,
        created_at: Utc::now(),
        narration: Enrichment::default(),
        portrait: Enrichment::default(),
        title_refinement: Enrichment::default(),
    }
}

/// Response builders for each workflow contract.
pub mod replies {
    use super::*;

    pub fn companions(ids: &[&str]) -> Value {
        json!({ "companion_ids": ids })
    }

    /// Scenarios with the given ids and generated titles.
    pub fn scenarios(ids: &[&str]) -> Value {
        let scenarios: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "title": format!("Adventure {id}"),
                    "description": format!("{{{{child-1}}}} sets off on adventure {id}."),
                })
            })
            .collect();
        json!({ "scenarios": scenarios })
    }

    /// Synopses with the given ids; titles carry `tag` so batches differ.
    pub fn synopses(ids: &[&str], tag: &str) -> Value {
        let synopses: Vec<Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "title": format!("{tag} plot {id}"),
                    "summary": "It begins, it wobbles, it ends happily.",
                })
            })
            .collect();
        json!({ "synopses": synopses })
    }

    pub fn story(title: &str, mood: &str, text: &str) -> Value {
        json!({ "title": title, "mood": mood, "text": text })
    }

    /// A story starring the child and Captain Whiskers.
    pub fn whiskers_story() -> Value {
        story(
            "{{child-1}} and the Moon Boat",
            "adventurous",
            "{{child-1}} found a silver boat. {{ char-7 }} hopped aboard, \
             and together they sailed to the moon.",
        )
    }
}

/// Test harness: a seeded family, a session, and an engine over mocks.
///
/// The family (owner `owner-1`):
/// - `child-1` Mia, age 6 (the session's child)
/// - `child-2` Leo, age 9
/// - `char-7` Captain Whiskers, family-wide
/// - `char-8` Pip, scoped to Mia
/// - `char-9` Old Dragon, deleted
/// - `char-10` Bear, scoped to Leo
///
/// plus `char-99` belonging to another family.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub model: Arc<MockModel>,
    pub clock: Arc<ManualClock>,
    pub workflow: StoryWorkflow,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::build(WorkflowConfig::default(), Vec::new()).await
    }

    /// Harness whose compiles fan out to `jobs`.
    pub async fn with_jobs(jobs: Vec<Arc<dyn EnrichmentJob>>) -> Self {
        Self::build(WorkflowConfig::default(), jobs).await
    }

    pub async fn build(config: WorkflowConfig, jobs: Vec<Arc<dyn EnrichmentJob>>) -> Self {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let model = Arc::new(MockModel::new());

        seed_family(&store).await;
        let _ = store.put_session(Session::new(SESSION_ID, CHILD_ID)).await;

        let mut workflow =
            StoryWorkflow::with_clock(store.clone(), model.clone(), config, clock.clone());
        if !jobs.is_empty() {
            let enricher = jobs
                .into_iter()
                .fold(Enricher::new(store.clone(), clock.clone()), Enricher::with_job);
            workflow = workflow.with_enrichment(Arc::new(enricher));
        }

        Self {
            store,
            model,
            clock,
            workflow,
        }
    }

    /// An advance request for the seeded session.
    pub fn request(&self) -> AdvanceRequest {
        AdvanceRequest::new(CHILD_ID, SESSION_ID)
    }

    pub async fn advance(&self, request: AdvanceRequest) -> PhaseOutput {
        self.workflow.advance(request).await
    }

    /// The seeded session as currently stored.
    pub async fn session(&self) -> Session {
        match self.store.get_session(SESSION_ID).await {
            Ok(Some(session)) => session,
            other => panic!("seeded session missing: {other:?}"),
        }
    }

    pub async fn story(&self) -> Option<Story> {
        self.store.get_story(SESSION_ID).await.ok().flatten()
    }

    /// Drive the seeded session to the synopsis screen with `companions`
    /// confirmed and scenario `B` picked.
    pub async fn reach_synopses(&self, companions: &[&str]) -> PhaseOutput {
        self.model.push("offer_scenarios", replies::scenarios(&["A", "B", "C"]));
        self.model.push("offer_synopses", replies::synopses(&["A", "B"], "First"));

        self.advance(
            self.request()
                .with_action(crate::workflow::Action::ConfirmCompanions)
                .with_companions(companions.iter().copied()),
        )
        .await;
        self.advance(self.request().with_option("B")).await
    }
}

async fn seed_family(store: &MemoryStore) {
    store
        .insert_child(ChildProfile::new(CHILD_ID, OWNER_ID, "Mia").with_age(6))
        .await;
    store
        .insert_child(ChildProfile::new("child-2", OWNER_ID, "Leo").with_age(9))
        .await;
    store
        .insert_character(
            Character::new("char-7", OWNER_ID, "Captain Whiskers")
                .with_description("a brave ship's cat"),
        )
        .await;
    store
        .insert_character(Character::new("char-8", OWNER_ID, "Pip").for_child(CHILD_ID))
        .await;
    store
        .insert_character(Character::new("char-9", OWNER_ID, "Old Dragon").deleted())
        .await;
    store
        .insert_character(Character::new("char-10", OWNER_ID, "Bear").for_child("child-2"))
        .await;
    store
        .insert_character(Character::new("char-99", "owner-2", "Stranger"))
        .await;
}

/// Assert the output is in the given state.
#[track_caller]
pub fn assert_state(output: &PhaseOutput, state: &str) {
    assert_eq!(
        output.state(),
        state,
        "Expected state '{state}', got {output:?}"
    );
}

/// Assert the output is an error mentioning `needle`.
#[track_caller]
pub fn assert_error_contains(output: &PhaseOutput, needle: &str) {
    match output {
        PhaseOutput::Error { error, .. } => assert!(
            error.contains(needle),
            "Expected error containing '{needle}', got '{error}'"
        ),
        other => panic!("Expected an error, got {other:?}"),
    }
}

/// Assert the session's persisted phase.
#[track_caller]
pub fn assert_phase(session: &Session, phase: Phase) {
    assert_eq!(
        session.phase,
        Some(phase),
        "Expected phase {}, got {:?}",
        phase.name(),
        session.phase
    );
}

/// Assert text has no `{{id}}` tokens left.
#[track_caller]
pub fn assert_no_tokens(text: &str) {
    let left = placeholder::tokens(text);
    assert!(left.is_empty(), "Unresolved tokens {left:?} in: {text}");
}
