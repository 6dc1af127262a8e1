//! Run one story session end to end against the real model.
//!
//! Usage: `storyloom-headless [DATA_DIR] [CHILD_NAME]`
//!
//! Seeds a child and a companion into a file store, drives a fresh session
//! to a finished story, runs title refinement, and prints the result.
//! `STORYLOOM_CONFIG` may point at a generator config JSON file.

use std::sync::Arc;
use story_core::clock::SystemClock;
use story_core::entity::{Character, ChildProfile};
use story_core::headless::{HeadlessConfig, HeadlessRunner};
use story_core::{
    ClaudeModel, DocumentStore, Enricher, FileStore, GeneratorConfig, Session, StoryWorkflow,
    TitleRefinementJob, WorkflowConfig,
};

const OWNER_ID: &str = "headless-owner";
const CHILD_ID: &str = "headless-child";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load .env file
    let _ = dotenvy::dotenv();
    let verbose = std::env::var("STORYLOOM_VERBOSE").is_ok();
    let _ = story_core::telemetry::init_tracing(verbose);

    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        eprintln!("Error: ANTHROPIC_API_KEY environment variable not set");
        eprintln!("Set it in your environment or create a .env file");
        std::process::exit(1);
    }

    let mut args = std::env::args().skip(1);
    let data_dir = args.next().unwrap_or_else(|| "storyloom-data".to_string());
    let child_name = args.next().unwrap_or_else(|| "Mia".to_string());

    let generator = match std::env::var("STORYLOOM_CONFIG") {
        Ok(path) => GeneratorConfig::load(&path).await?,
        Err(_) => GeneratorConfig::default(),
    };
    let config = WorkflowConfig::default().with_generator(generator);

    let store = Arc::new(FileStore::open(&data_dir).await?);
    store
        .put_child(&ChildProfile::new(CHILD_ID, OWNER_ID, &child_name).with_age(6))
        .await?;
    store
        .put_character(
            &Character::new("headless-whiskers", OWNER_ID, "Captain Whiskers")
                .with_description("a brave ship's cat who is afraid of puddles"),
        )
        .await?;
    store
        .put_character(
            &Character::new("headless-pip", OWNER_ID, "Pip")
                .with_description("a tiny robot who collects buttons")
                .for_child(CHILD_ID),
        )
        .await?;

    let session_id = uuid::Uuid::new_v4().to_string();
    store.put_session(Session::new(&session_id, CHILD_ID)).await?;

    let model = Arc::new(ClaudeModel::from_env()?);
    let workflow = StoryWorkflow::new(store.clone(), model, config.clone());

    println!("Session {session_id} for {child_name}\n");
    let run = HeadlessRunner::new(&workflow, HeadlessConfig::default())
        .run(CHILD_ID, &session_id)
        .await?;

    for entry in &run.transcript {
        println!("  [{}] {:<20} {}", entry.step, entry.state, entry.choice);
    }

    let enricher = Enricher::new(store.clone(), Arc::new(SystemClock)).with_job(Arc::new(
        TitleRefinementJob::new(workflow.generator().clone(), config.generator.clone()),
    ));
    for report in enricher.fan_out(&run.story_id).await? {
        if let Err(e) = &report.result {
            eprintln!("{} failed: {e}", report.kind.name());
        }
    }

    let title = match store.get_story(&run.story_id).await? {
        Some(story) => story.display_title().to_string(),
        None => run.title.clone(),
    };

    println!("\n# {title}\n_{}_\n\n{}", run.mood, run.text);
    println!("\nSaved under {}", store.root().display());
    Ok(())
}
