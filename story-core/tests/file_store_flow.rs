//! End-to-end run against the JSON-file store.

use std::sync::Arc;
use story_core::entity::{Character, ChildProfile};
use story_core::headless::{HeadlessConfig, HeadlessRunner};
use story_core::session::Session;
use story_core::testing::{assert_no_tokens, replies, MockModel, CHILD_ID, OWNER_ID, SESSION_ID};
use story_core::{DocumentStore, FileStore, Phase, SessionStatus, StoryWorkflow, WorkflowConfig};
use tempfile::TempDir;

async fn seeded_store(dir: &TempDir) -> Arc<FileStore> {
    let store = FileStore::open(dir.path()).await.unwrap();
    store
        .put_child(&ChildProfile::new(CHILD_ID, OWNER_ID, "Mia").with_age(6))
        .await
        .unwrap();
    store
        .put_character(
            &Character::new("char-7", OWNER_ID, "Captain Whiskers")
                .with_description("a brave ship's cat"),
        )
        .await
        .unwrap();
    store.put_session(Session::new(SESSION_ID, CHILD_ID)).await.unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn test_headless_run_persists_to_disk() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;

    let model = Arc::new(MockModel::new());
    model.push("propose_companions", replies::companions(&["child-1", "char-7"]));
    model.push("offer_scenarios", replies::scenarios(&["A", "B"]));
    model.push("offer_synopses", replies::synopses(&["A", "B"], "First"));
    model.push("write_story", replies::whiskers_story());

    let workflow = StoryWorkflow::new(store.clone(), model.clone(), WorkflowConfig::default());
    let run = HeadlessRunner::new(&workflow, HeadlessConfig::default())
        .run(CHILD_ID, SESSION_ID)
        .await
        .unwrap();

    assert_eq!(run.story_id, SESSION_ID);
    assert_eq!(run.title, "Mia and the Moon Boat");
    assert_no_tokens(&run.text);
    drop(workflow);
    drop(store);

    // A fresh handle sees everything the run wrote.
    let reopened = FileStore::open(dir.path()).await.unwrap();
    let session = reopened.get_session(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(session.phase, Some(Phase::Complete));
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.selected_companion_ids, vec!["child-1", "char-7"]);
    assert_eq!(session.selected_scenario_id.as_deref(), Some("A"));
    assert!(!session.compile_in_progress);

    let story = reopened.get_story(SESSION_ID).await.unwrap().unwrap();
    assert_eq!(story.text, run.text);
    assert!(story.text.contains("Captain Whiskers hopped aboard"));

    let traces = reopened.traces().await.unwrap();
    assert_eq!(traces.len(), 4);
    assert!(traces.iter().all(|t| t.success));
    assert!(traces
        .iter()
        .all(|t| t.session_id.as_deref() == Some(SESSION_ID)));
}

#[tokio::test]
async fn test_replay_after_reopen() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    let model = Arc::new(MockModel::new());
    model.push("propose_companions", replies::companions(&["child-1", "char-7"]));
    model.push("offer_scenarios", replies::scenarios(&["A", "B"]));
    model.push("offer_synopses", replies::synopses(&["A", "B"], "First"));
    model.push("write_story", replies::whiskers_story());

    let first = {
        let workflow = StoryWorkflow::new(store, model.clone(), WorkflowConfig::default());
        HeadlessRunner::new(&workflow, HeadlessConfig::default())
            .run(CHILD_ID, SESSION_ID)
            .await
            .unwrap()
    };

    let reopened = Arc::new(FileStore::open(dir.path()).await.unwrap());
    let workflow = StoryWorkflow::new(reopened, model.clone(), WorkflowConfig::default());
    let again = HeadlessRunner::new(&workflow, HeadlessConfig::default())
        .run(CHILD_ID, SESSION_ID)
        .await
        .unwrap();

    assert_eq!(again.text, first.text);
    assert_eq!(again.transcript.len(), 1);
    assert_eq!(model.calls_for("write_story"), 1);
}
