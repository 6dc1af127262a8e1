//! The phase-based story workflow.
//!
//! Every call is stateless: the session document is read, the branch for
//! its current phase runs, and the fields that branch owns are written
//! back. Phases advance in order:
//!
//! ```text
//! character_selection -> scenario_selection -> synopsis_selection
//!     -> story_generation -> complete
//! ```
//!
//! A failing call reports an `error` state and leaves the persisted phase
//! as it was, so retrying the same request re-enters the same branch.

mod companions;
mod compile;
pub mod contracts;
mod output;
pub mod prompts;
mod scenarios;
mod synopses;

pub use compile::{CompileOutcome, CompileReport, CompileRequest, CompileResponse};
pub use output::{Action, AdvanceRequest, AdvanceResponse, PhaseOutput};

use crate::clock::{Clock, SystemClock};
use crate::config::{GenerationStep, StepSettings, WorkflowConfig};
use crate::contract::OutputContract;
use crate::enrich::Enricher;
use crate::entity::ChildProfile;
use crate::lock::CompileLock;
use crate::model::{GenerationRequest, Generator, ModelClient, ModelError};
use crate::session::{Phase, Session};
use crate::store::{DocumentStore, StoreError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;

/// Errors from a workflow step.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("{0}")]
    Input(String),

    #[error("{0}")]
    MissingPrerequisite(String),

    #[error("Story is already being written for session '{0}'")]
    CompileInProgress(String),

    #[error("Story compile failed: {0}")]
    CompileFailed(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Message safe to show the child's app. Upstream failures are
    /// reported generically; the details go to the logs and traces.
    pub fn client_message(&self) -> String {
        match self {
            WorkflowError::SessionNotFound(_)
            | WorkflowError::Input(_)
            | WorkflowError::MissingPrerequisite(_) => self.to_string(),
            WorkflowError::CompileInProgress(_) => {
                "Your story is already being written. Try again shortly.".to_string()
            }
            WorkflowError::CompileFailed(_) | WorkflowError::Model(_) => {
                "The storyteller is having trouble right now. Please try again.".to_string()
            }
            WorkflowError::Store(_) => {
                "Something went wrong saving your story. Please try again.".to_string()
            }
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, WorkflowError::CompileInProgress(_))
    }
}

impl From<&WorkflowError> for PhaseOutput {
    fn from(error: &WorkflowError) -> Self {
        PhaseOutput::Error {
            error: error.client_message(),
            in_progress: error.is_in_progress(),
        }
    }
}

/// The story workflow engine.
pub struct StoryWorkflow {
    store: Arc<dyn DocumentStore>,
    generator: Generator,
    config: WorkflowConfig,
    locks: CompileLock,
    enrichment: Option<Arc<Enricher>>,
    clock: Arc<dyn Clock>,
}

impl StoryWorkflow {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        model: Arc<dyn ModelClient>,
        config: WorkflowConfig,
    ) -> Self {
        Self::with_clock(store, model, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        model: Arc<dyn ModelClient>,
        config: WorkflowConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let generator = Generator::new(
            model,
            Arc::clone(&store),
            Arc::clone(&clock),
            config.trace_excerpt_chars,
        );
        let locks = CompileLock::new(Arc::clone(&store), Arc::clone(&clock), config.lock_timeout);
        Self {
            store,
            generator,
            config,
            locks,
            enrichment: None,
            clock,
        }
    }

    /// Run these enrichment jobs after every successful compile.
    pub fn with_enrichment(mut self, enricher: Arc<Enricher>) -> Self {
        self.enrichment = Some(enricher);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Handle one step of the flow. Failures come back as the `error` state.
    pub async fn advance(&self, request: AdvanceRequest) -> PhaseOutput {
        let session_id = request.session_id.clone();
        match self.try_advance(request).await {
            Ok(output) => output,
            Err(e) => {
                match &e {
                    WorkflowError::Model(_)
                    | WorkflowError::Store(_)
                    | WorkflowError::CompileFailed(_) => {
                        tracing::error!(session_id = %session_id, error = %e, "Advance failed")
                    }
                    _ => tracing::info!(session_id = %session_id, error = %e, "Advance rejected"),
                }
                PhaseOutput::from(&e)
            }
        }
    }

    /// Handle one step of the flow.
    pub async fn try_advance(&self, request: AdvanceRequest) -> Result<PhaseOutput, WorkflowError> {
        let session = self.load_session(&request.session_id).await?;
        if !request.child_id.trim().is_empty() && request.child_id.trim() != session.child_id {
            return Err(WorkflowError::Input(format!(
                "Session '{}' does not belong to child '{}'",
                session.id, request.child_id
            )));
        }
        let child = self.load_child(&session.child_id).await?;

        tracing::debug!(
            session_id = %session.id,
            phase = session.phase.map(|p| p.name()).unwrap_or("none"),
            action = ?request.action,
            "Advancing session"
        );

        match request.action {
            Some(Action::ChangeCompanions) => {
                return match session.phase {
                    Some(Phase::StoryGeneration) | Some(Phase::Complete) => {
                        Err(WorkflowError::Input(
                            "Companions cannot change once the story is being written".to_string(),
                        ))
                    }
                    _ => self.change_companions(&session, &child).await,
                };
            }
            Some(Action::MoreSynopses) => {
                return match session.phase {
                    Some(Phase::SynopsisSelection) => {
                        self.generate_synopses(&session, &child, true).await
                    }
                    _ => Err(WorkflowError::Input(
                        "More plots can only be requested while choosing a plot".to_string(),
                    )),
                };
            }
            Some(Action::ConfirmCompanions) | None => {}
        }

        let confirming = request.action == Some(Action::ConfirmCompanions);
        match session.phase {
            None | Some(Phase::CharacterSelection) => {
                if confirming {
                    self.confirm_companions(&session, &child, &request.selected_companion_ids)
                        .await
                } else {
                    self.serve_companions(&session, &child).await
                }
            }
            // A repeated confirmation in a later phase just re-serves it.
            Some(Phase::ScenarioSelection) => match request.option_id().filter(|_| !confirming) {
                Some(id) => self.select_scenario(&session, &child, id).await,
                None => self.serve_scenarios(&session, &child).await,
            },
            Some(Phase::SynopsisSelection) => match request.option_id().filter(|_| !confirming) {
                Some(id) => self.select_synopsis(&session, id).await,
                None => self.serve_synopses(&session, &child).await,
            },
            Some(Phase::StoryGeneration) => self.compile_for_advance(&session.id).await,
            Some(Phase::Complete) => {
                let story = self.store.get_story(&session.id).await?.ok_or_else(|| {
                    WorkflowError::MissingPrerequisite(format!(
                        "Session '{}' is complete but its story is missing",
                        session.id
                    ))
                })?;
                Ok(PhaseOutput::finished(&story))
            }
        }
    }

    async fn load_session(&self, session_id: &str) -> Result<Session, WorkflowError> {
        if session_id.trim().is_empty() {
            return Err(WorkflowError::Input("A session id is required".to_string()));
        }
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| WorkflowError::SessionNotFound(session_id.to_string()))
    }

    async fn load_child(&self, child_id: &str) -> Result<ChildProfile, WorkflowError> {
        match self.store.get_child(child_id).await? {
            Some(child) if !child.deleted => Ok(child),
            _ => Err(WorkflowError::MissingPrerequisite(format!(
                "Child profile '{child_id}' not found"
            ))),
        }
    }

    /// Resolved settings for a step.
    fn settings(&self, step: GenerationStep) -> StepSettings {
        self.config.generator.settings(step)
    }

    /// Call the model for `step` with the step's system prompt.
    async fn generate<T>(
        &self,
        step: GenerationStep,
        session_id: &str,
        settings: StepSettings,
        prompt: String,
    ) -> Result<T, WorkflowError>
    where
        T: OutputContract + DeserializeOwned,
    {
        let system = prompts::system_for(step, &settings);
        let output = self
            .generator
            .generate(GenerationRequest {
                step,
                session_id: Some(session_id.to_string()),
                settings,
                system,
                prompt,
            })
            .await?;
        Ok(output)
    }
}
