//! Post-compile enrichment.
//!
//! Once a story exists, several independent jobs decorate it: narration
//! audio, a portrait of the participants, and a polished title. Each job
//! owns one sub-status on the story and nothing else. Jobs run
//! concurrently and every job is awaited to completion; one failing never
//! cancels or affects the others, and nothing here can change the compile
//! result that triggered it.

use crate::clock::Clock;
use crate::config::{GenerationStep, GeneratorConfig};
use crate::contract::OutputContract;
use crate::entity::{self, Entity};
use crate::model::{GenerationRequest, Generator, ModelError};
use crate::store::{DocumentStore, StoreError};
use crate::story::{Enrichment, JobKind, Story};
use crate::workflow::prompts;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors from a single enrichment job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Failed(String),
}

/// One independent post-compile job.
#[async_trait]
pub trait EnrichmentJob: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Produce the job's output (asset URL or refined text).
    async fn run(&self, story: &Story) -> Result<String, JobError>;
}

/// Outcome of one job in a fan-out.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub kind: JobKind,
    pub result: Result<String, String>,
}

impl JobReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs the enrichment jobs for a story.
pub struct Enricher {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    jobs: Vec<Arc<dyn EnrichmentJob>>,
}

impl Enricher {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            jobs: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: Arc<dyn EnrichmentJob>) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn job_kinds(&self) -> Vec<JobKind> {
        self.jobs.iter().map(|j| j.kind()).collect()
    }

    /// Run every job against the story and wait for all of them.
    ///
    /// Only a missing story is an error; job failures are recorded on the
    /// story and reported per job.
    pub async fn fan_out(&self, story_id: &str) -> Result<Vec<JobReport>, StoreError> {
        let story = self
            .store
            .get_story(story_id)
            .await?
            .ok_or_else(|| StoreError::not_found("stories", story_id))?;
        let story = Arc::new(story);

        tracing::info!(story_id, jobs = self.jobs.len(), "Starting enrichment");

        let handles: Vec<(JobKind, JoinHandle<Result<String, String>>)> = self
            .jobs
            .iter()
            .map(|job| {
                let kind = job.kind();
                let handle = tokio::spawn(run_job(
                    Arc::clone(job),
                    Arc::clone(&story),
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                ));
                (kind, handle)
            })
            .collect();

        let (kinds, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut reports = Vec::with_capacity(joined.len());
        for (kind, outcome) in kinds.into_iter().zip(joined) {
            let result = match outcome {
                Ok(result) => result,
                Err(join_error) => {
                    // The job panicked or was cancelled before recording an outcome.
                    let message = format!("job aborted: {join_error}");
                    tracing::error!(
                        story_id,
                        job = kind.name(),
                        error = %message,
                        "Enrichment job aborted"
                    );
                    self.record(story_id, kind, Enrichment::failed(&message, self.clock.now()))
                        .await;
                    Err(message)
                }
            };
            reports.push(JobReport { kind, result });
        }

        let failed = reports.iter().filter(|r| !r.is_ok()).count();
        tracing::info!(story_id, failed, "Enrichment finished");
        Ok(reports)
    }

    /// Start the fan-out in the background.
    pub fn schedule(self: &Arc<Self>, story_id: impl Into<String>) -> JoinHandle<Vec<JobReport>> {
        let enricher = Arc::clone(self);
        let story_id = story_id.into();
        tokio::spawn(async move {
            match enricher.fan_out(&story_id).await {
                Ok(reports) => reports,
                Err(e) => {
                    tracing::error!(story_id = %story_id, error = %e, "Enrichment could not start");
                    Vec::new()
                }
            }
        })
    }

    async fn record(&self, story_id: &str, kind: JobKind, enrichment: Enrichment) {
        record(self.store.as_ref(), story_id, kind, enrichment).await;
    }
}

async fn run_job(
    job: Arc<dyn EnrichmentJob>,
    story: Arc<Story>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
) -> Result<String, String> {
    let kind = job.kind();
    record(store.as_ref(), &story.id, kind, Enrichment::running(clock.now())).await;

    match job.run(&story).await {
        Ok(output) => {
            tracing::debug!(story_id = %story.id, job = kind.name(), "Enrichment job ready");
            record(store.as_ref(), &story.id, kind, Enrichment::ready(&output, clock.now())).await;
            Ok(output)
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(
                story_id = %story.id,
                job = kind.name(),
                error = %message,
                "Enrichment job failed"
            );
            let failed = Enrichment::failed(&message, clock.now());
            record(store.as_ref(), &story.id, kind, failed).await;
            Err(message)
        }
    }
}

/// Write a sub-status; a failed write is logged and otherwise ignored.
async fn record(store: &dyn DocumentStore, story_id: &str, kind: JobKind, enrichment: Enrichment) {
    if let Err(e) = store.set_enrichment(story_id, kind, enrichment).await {
        tracing::warn!(
            story_id,
            job = kind.name(),
            error = %e,
            "Failed to record enrichment status"
        );
    }
}

/// Turns story text into narration audio and returns its URL.
#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    async fn synthesize(&self, story_id: &str, text: &str) -> Result<String, JobError>;
}

/// Renders a composite portrait of the participants and returns its URL.
#[async_trait]
pub trait PortraitRenderer: Send + Sync {
    async fn render(
        &self,
        story_id: &str,
        participants: &[Entity],
        style_id: Option<&str>,
    ) -> Result<String, JobError>;
}

pub struct NarrationJob {
    synthesizer: Arc<dyn NarrationSynthesizer>,
}

impl NarrationJob {
    pub fn new(synthesizer: Arc<dyn NarrationSynthesizer>) -> Self {
        Self { synthesizer }
    }
}

#[async_trait]
impl EnrichmentJob for NarrationJob {
    fn kind(&self) -> JobKind {
        JobKind::Narration
    }

    async fn run(&self, story: &Story) -> Result<String, JobError> {
        if story.text.trim().is_empty() {
            return Err(JobError::Failed("story has no text to narrate".to_string()));
        }
        self.synthesizer.synthesize(&story.id, &story.text).await
    }
}

pub struct PortraitJob {
    renderer: Arc<dyn PortraitRenderer>,
    store: Arc<dyn DocumentStore>,
}

impl PortraitJob {
    pub fn new(renderer: Arc<dyn PortraitRenderer>, store: Arc<dyn DocumentStore>) -> Self {
        Self { renderer, store }
    }
}

#[async_trait]
impl EnrichmentJob for PortraitJob {
    fn kind(&self) -> JobKind {
        JobKind::Portrait
    }

    async fn run(&self, story: &Story) -> Result<String, JobError> {
        let map = entity::resolve_all(self.store.as_ref(), &story.participant_ids).await?;
        let participants: Vec<Entity> = entity::ordered(&story.participant_ids, &map)
            .into_iter()
            .cloned()
            .collect();
        if participants.is_empty() {
            return Err(JobError::Failed("no participants to portray".to_string()));
        }
        self.renderer
            .render(&story.id, &participants, story.style_id.as_deref())
            .await
    }
}

/// A better title for a finished story
#[derive(Debug, Deserialize, OutputContract)]
#[contract(name = "refined_title")]
pub struct RefinedTitle {
    /// The new title, at most eight words
    #[contract(non_empty)]
    pub title: String,
}

/// Asks the model for a polished title.
pub struct TitleRefinementJob {
    generator: Generator,
    config: GeneratorConfig,
}

impl TitleRefinementJob {
    pub fn new(generator: Generator, config: GeneratorConfig) -> Self {
        Self { generator, config }
    }
}

#[async_trait]
impl EnrichmentJob for TitleRefinementJob {
    fn kind(&self) -> JobKind {
        JobKind::TitleRefinement
    }

    async fn run(&self, story: &Story) -> Result<String, JobError> {
        let settings = self.config.settings(GenerationStep::TitleRefinement);
        let system = prompts::system_for(GenerationStep::TitleRefinement, &settings);
        let refined: RefinedTitle = self
            .generator
            .generate(GenerationRequest {
                step: GenerationStep::TitleRefinement,
                session_id: Some(story.id.clone()),
                settings,
                system,
                prompt: prompts::title_prompt(&story.title, &story.mood, &story.text),
            })
            .await?;
        Ok(refined.title.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::EnrichmentStatus;
    use crate::testing::{sample_story, StaticJob};
    use crate::store::MemoryStore;
    use crate::clock::SystemClock;

    async fn store_with_story() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.put_story(sample_story("s1")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_all_jobs_ready() {
        let store = store_with_story().await;
        let enricher = Enricher::new(store.clone(), Arc::new(SystemClock))
            .with_job(Arc::new(StaticJob::ok(JobKind::Narration, "https://cdn/n.mp3")))
            .with_job(Arc::new(StaticJob::ok(JobKind::Portrait, "https://cdn/p.png")))
            .with_job(Arc::new(StaticJob::ok(JobKind::TitleRefinement, "Better Title")));

        let reports = enricher.fan_out("s1").await.unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(JobReport::is_ok));

        let story = store.get_story("s1").await.unwrap().unwrap();
        assert_eq!(story.narration.output.as_deref(), Some("https://cdn/n.mp3"));
        assert_eq!(story.display_title(), "Better Title");
    }

    #[tokio::test]
    async fn test_failing_job_does_not_affect_others() {
        let store = store_with_story().await;
        let enricher = Enricher::new(store.clone(), Arc::new(SystemClock))
            .with_job(Arc::new(StaticJob::ok(JobKind::Narration, "n.mp3")))
            .with_job(Arc::new(StaticJob::failing(JobKind::Portrait, "renderer down")))
            .with_job(Arc::new(StaticJob::ok(JobKind::TitleRefinement, "New")));

        let reports = enricher.fan_out("s1").await.unwrap();
        let failed: Vec<_> = reports.iter().filter(|r| !r.is_ok()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].kind, JobKind::Portrait);

        let story = store.get_story("s1").await.unwrap().unwrap();
        assert_eq!(story.portrait.status, EnrichmentStatus::Error);
        assert_eq!(story.portrait.error.as_deref(), Some("renderer down"));
        assert_eq!(story.narration.status, EnrichmentStatus::Ready);
        assert_eq!(story.title_refinement.status, EnrichmentStatus::Ready);
    }

    #[tokio::test]
    async fn test_panicking_job_is_recorded() {
        let store = store_with_story().await;
        let enricher = Enricher::new(store.clone(), Arc::new(SystemClock))
            .with_job(Arc::new(StaticJob::panicking(JobKind::Narration)))
            .with_job(Arc::new(StaticJob::ok(JobKind::Portrait, "p.png")));

        let reports = enricher.fan_out("s1").await.unwrap();
        assert!(!reports[0].is_ok());
        assert!(reports[1].is_ok());

        let story = store.get_story("s1").await.unwrap().unwrap();
        assert_eq!(story.narration.status, EnrichmentStatus::Error);
        assert_eq!(story.portrait.status, EnrichmentStatus::Ready);
    }

    #[tokio::test]
    async fn test_missing_story() {
        let store = Arc::new(MemoryStore::new());
        let enricher = Arc::new(
            Enricher::new(store, Arc::new(SystemClock))
                .with_job(Arc::new(StaticJob::ok(JobKind::Narration, "n"))),
        );
        assert!(enricher.fan_out("nope").await.is_err());
        assert!(enricher.schedule("nope").await.unwrap().is_empty());
    }
}
