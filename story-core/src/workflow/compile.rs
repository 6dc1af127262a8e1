//! story_generation: the lock-guarded compile step.

use super::contracts::StoryDraft;
use super::{prompts, PhaseOutput, StoryWorkflow, WorkflowError};
use crate::config::GenerationStep;
use crate::enrich::JobReport;
use crate::entity::{self, AgeBand};
use crate::lock::LockAttempt;
use crate::placeholder;
use crate::session::{Phase, SessionStatus, SessionUpdate};
use crate::store::StoreError;
use crate::story::{Enrichment, Story};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Request to compile a session's story.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileRequest {
    pub session_id: String,
    /// Overrides the session's style when given.
    #[serde(default)]
    pub style_id: Option<String>,
    /// Identifies the caller in the lock; generated when absent.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl CompileRequest {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style_id: impl Into<String>) -> Self {
        self.style_id = Some(style_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum CompileOutcome {
    /// This request wrote the story.
    Compiled(Box<Story>),
    /// The story already existed; nothing was recompiled.
    AlreadyCompleted(Box<Story>),
    /// Another request holds the compile lock.
    InProgress,
    /// Compile failed; the message is safe to show.
    Failed(String),
}

/// Result of a compile call plus the handle of any enrichment it started.
pub struct CompileReport {
    pub outcome: CompileOutcome,
    /// Background fan-out, present only when this request compiled the
    /// story and enrichment is configured.
    pub enrichment: Option<JoinHandle<Vec<JobReport>>>,
}

/// Wire shape of a compile response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompileResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_in_progress: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_completed: bool,
}

impl CompileResponse {
    /// HTTP status to send with this response.
    pub fn status_code(&self) -> u16 {
        if self.ok {
            200
        } else if self.already_in_progress {
            409
        } else {
            500
        }
    }
}

impl From<&CompileOutcome> for CompileResponse {
    fn from(outcome: &CompileOutcome) -> Self {
        let base = CompileResponse {
            ok: true,
            artifact_id: None,
            error_message: None,
            already_in_progress: false,
            already_completed: false,
        };
        match outcome {
            CompileOutcome::Compiled(story) => CompileResponse {
                artifact_id: Some(story.id.clone()),
                ..base
            },
            CompileOutcome::AlreadyCompleted(story) => CompileResponse {
                artifact_id: Some(story.id.clone()),
                already_completed: true,
                ..base
            },
            CompileOutcome::InProgress => CompileResponse {
                ok: false,
                error_message: Some(
                    "Your story is already being written. Try again shortly.".to_string(),
                ),
                already_in_progress: true,
                ..base
            },
            CompileOutcome::Failed(message) => CompileResponse {
                ok: false,
                error_message: Some(message.clone()),
                ..base
            },
        }
    }
}

impl StoryWorkflow {
    /// Compile the session's story, at most once and by one request at a
    /// time. Enrichment is scheduled only after the lock is released.
    pub async fn compile(&self, request: CompileRequest) -> CompileReport {
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let session_id = request.session_id.as_str();

        let attempt = match self.locks.try_acquire(session_id, &request_id).await {
            Ok(attempt) => attempt,
            Err(e) => {
                tracing::error!(session_id, error = %e, "Could not take compile lock");
                return CompileReport {
                    outcome: CompileOutcome::Failed(WorkflowError::from(e).client_message()),
                    enrichment: None,
                };
            }
        };

        match attempt {
            LockAttempt::AlreadyCompleted(story) => {
                tracing::info!(session_id, "Story already compiled, replaying");
                return CompileReport {
                    outcome: CompileOutcome::AlreadyCompleted(story),
                    enrichment: None,
                };
            }
            LockAttempt::InProgress { .. } => {
                return CompileReport {
                    outcome: CompileOutcome::InProgress,
                    enrichment: None,
                };
            }
            LockAttempt::Acquired => {}
        }

        let timer = Instant::now();
        let result = self.compile_story(session_id, request.style_id.as_deref()).await;
        let elapsed = timer.elapsed();
        if elapsed > self.config.compile_timeout {
            tracing::warn!(
                session_id,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.config.compile_timeout.as_millis() as u64,
                "Compile exceeded its time budget"
            );
        }

        let error_text = result.as_ref().err().map(|e| e.to_string());
        match self
            .locks
            .release(session_id, &request_id, error_text.as_deref())
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                session_id,
                request_id = %request_id,
                "Compile lock no longer ours at release"
            ),
            Err(e) => tracing::error!(session_id, error = %e, "Failed to release compile lock"),
        }

        match result {
            Ok(Committed::Existing(story)) => {
                tracing::info!(
                    session_id,
                    request_id = %request_id,
                    "Another request wrote the story first, keeping it"
                );
                CompileReport {
                    outcome: CompileOutcome::AlreadyCompleted(Box::new(story)),
                    enrichment: None,
                }
            }
            Ok(Committed::Written(story)) => {
                tracing::info!(
                    session_id,
                    request_id = %request_id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Story compiled"
                );
                let enrichment = self
                    .enrichment
                    .as_ref()
                    .map(|enricher| enricher.schedule(story.id.clone()));
                CompileReport {
                    outcome: CompileOutcome::Compiled(Box::new(story)),
                    enrichment,
                }
            }
            Err(e) => {
                tracing::error!(
                    session_id,
                    request_id = %request_id,
                    error = %e,
                    "Story compile failed"
                );
                CompileReport {
                    outcome: CompileOutcome::Failed(e.client_message()),
                    enrichment: None,
                }
            }
        }
    }

    /// Compile on behalf of an advance call.
    pub(super) async fn compile_for_advance(
        &self,
        session_id: &str,
    ) -> Result<PhaseOutput, WorkflowError> {
        let report = self.compile(CompileRequest::new(session_id)).await;
        // A scheduled fan-out keeps running on its own.
        match report.outcome {
            CompileOutcome::Compiled(story) | CompileOutcome::AlreadyCompleted(story) => {
                Ok(PhaseOutput::finished(&story))
            }
            CompileOutcome::InProgress => {
                Err(WorkflowError::CompileInProgress(session_id.to_string()))
            }
            CompileOutcome::Failed(message) => Err(WorkflowError::CompileFailed(message)),
        }
    }

    /// Generate, resolve, and persist the story. Caller holds the lock.
    ///
    /// The story is written only if none exists yet, so a request that took
    /// over a stale lock cannot replace a story the original holder already
    /// finished.
    async fn compile_story(
        &self,
        session_id: &str,
        style_id: Option<&str>,
    ) -> Result<Committed, WorkflowError> {
        let session = self.load_session(session_id).await?;
        let child = self.load_child(&session.child_id).await?;

        let scenario = session.selected_scenario().ok_or_else(|| {
            WorkflowError::MissingPrerequisite(
                "Pick an adventure before writing the story".to_string(),
            )
        })?;
        let synopsis = session.selected_synopsis().ok_or_else(|| {
            WorkflowError::MissingPrerequisite("Pick a plot before writing the story".to_string())
        })?;
        if session.selected_companion_ids.is_empty() {
            return Err(WorkflowError::MissingPrerequisite(
                "Choose companions before writing the story".to_string(),
            ));
        }

        let style_id = style_id
            .map(str::to_string)
            .or_else(|| session.style_id.clone());

        let map = entity::resolve_all(self.store.as_ref(), &session.selected_companion_ids).await?;
        let cast = entity::ordered(&session.selected_companion_ids, &map);
        let prompt = prompts::story_prompt(
            &cast,
            AgeBand::from_age(child.age),
            scenario,
            synopsis,
            style_id.as_deref(),
        );

        let draft: StoryDraft = self
            .generate(
                GenerationStep::Story,
                &session.id,
                self.settings(GenerationStep::Story),
                prompt,
            )
            .await?;

        let title = placeholder::resolve(draft.title.trim(), &map);
        let text = placeholder::resolve(&draft.text, &map);
        let leftover = placeholder::tokens(&text);
        if !leftover.is_empty() {
            tracing::warn!(
                session_id,
                tokens = ?leftover,
                "Story text has unresolved placeholders"
            );
        }

        let story = Story {
            id: session.id.clone(),
            child_id: session.child_id.clone(),
            title,
            mood: draft.mood.trim().to_string(),
            text,
            participant_ids: session.selected_companion_ids.clone(),
            style_id: style_id.clone(),
            created_at: self.clock.now(),
            narration: Enrichment::default(),
            portrait: Enrichment::default(),
            title_refinement: Enrichment::default(),
        };
        if !self.store.create_story(story.clone()).await? {
            let existing = self
                .store
                .get_story(&session.id)
                .await?
                .ok_or_else(|| StoreError::not_found("stories", &session.id))?;
            self.mark_complete(&session.id, existing.style_id.clone()).await?;
            return Ok(Committed::Existing(existing));
        }

        self.mark_complete(&session.id, style_id).await?;
        Ok(Committed::Written(story))
    }

    async fn mark_complete(
        &self,
        session_id: &str,
        style_id: Option<String>,
    ) -> Result<(), WorkflowError> {
        self.store
            .update_session(
                session_id,
                SessionUpdate::new()
                    .phase(Phase::Complete)
                    .status(SessionStatus::Completed)
                    .style(style_id),
            )
            .await?;
        Ok(())
    }
}

enum Committed {
    Written(Story),
    /// Another request stored the story first.
    Existing(Story),
}
