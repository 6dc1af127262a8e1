//! synopsis_selection: offering plots for the chosen scenario.

use super::contracts::{relabel_if_ambiguous, SynopsisBatch};
use super::{prompts, PhaseOutput, StoryWorkflow, WorkflowError};
use crate::config::GenerationStep;
use crate::entity::{self, AgeBand, ChildProfile};
use crate::session::{Phase, Session, SessionUpdate};

impl StoryWorkflow {
    /// Show the synopses, generating them on first entry.
    pub(super) async fn serve_synopses(
        &self,
        session: &Session,
        child: &ChildProfile,
    ) -> Result<PhaseOutput, WorkflowError> {
        if session.synopses.is_empty() {
            return self.generate_synopses(session, child, false).await;
        }
        synopsis_selection(session)
    }

    /// Generate a fresh batch of synopses, replacing any previous batch.
    ///
    /// With `more`, sampling runs hotter and the model is told to avoid
    /// the plots already shown.
    pub(super) async fn generate_synopses(
        &self,
        session: &Session,
        child: &ChildProfile,
        more: bool,
    ) -> Result<PhaseOutput, WorkflowError> {
        let scenario = session.selected_scenario().ok_or_else(|| {
            WorkflowError::MissingPrerequisite(
                "Pick an adventure before choosing a plot".to_string(),
            )
        })?;

        let mut settings = self.settings(GenerationStep::Synopses);
        let avoid_titles: Vec<String> = if more {
            settings.temperature = self.config.raised_synopsis_temperature(settings.temperature);
            session.synopses.iter().map(|s| s.title.clone()).collect()
        } else {
            Vec::new()
        };

        let map = entity::resolve_all(self.store.as_ref(), &session.selected_companion_ids).await?;
        let cast = entity::ordered(&session.selected_companion_ids, &map);
        let prompt =
            prompts::synopsis_prompt(scenario, &cast, AgeBand::from_age(child.age), &avoid_titles);

        let mut batch: SynopsisBatch = self
            .generate(GenerationStep::Synopses, &session.id, settings, prompt)
            .await?;
        relabel_if_ambiguous(&mut batch.synopses, |s| &mut s.id);

        tracing::info!(
            session_id = %session.id,
            synopses = batch.synopses.len(),
            more,
            "Synopses generated"
        );

        let session = self
            .store
            .update_session(
                &session.id,
                SessionUpdate::new()
                    .phase(Phase::SynopsisSelection)
                    .synopses(batch.synopses)
                    .selected_synopsis(None),
            )
            .await?;

        synopsis_selection(&session)
    }

    /// Record the picked synopsis and write the story.
    pub(super) async fn select_synopsis(
        &self,
        session: &Session,
        option_id: &str,
    ) -> Result<PhaseOutput, WorkflowError> {
        if !session.synopses.iter().any(|s| s.id == option_id) {
            return Err(WorkflowError::MissingPrerequisite(format!("Unknown plot '{option_id}'")));
        }

        tracing::info!(session_id = %session.id, synopsis = option_id, "Synopsis selected");

        self.store
            .update_session(
                &session.id,
                SessionUpdate::new()
                    .selected_synopsis(Some(option_id.to_string()))
                    .phase(Phase::StoryGeneration),
            )
            .await?;

        self.compile_for_advance(&session.id).await
    }
}

fn synopsis_selection(session: &Session) -> Result<PhaseOutput, WorkflowError> {
    let scenario = session.selected_scenario().cloned().ok_or_else(|| {
        WorkflowError::MissingPrerequisite("Pick an adventure before choosing a plot".to_string())
    })?;
    Ok(PhaseOutput::SynopsisSelection {
        scenario,
        synopses: session.synopses.clone(),
    })
}
