//! character_selection: proposing and confirming the story's cast.

use super::contracts::CompanionProposal;
use super::{prompts, PhaseOutput, StoryWorkflow, WorkflowError};
use crate::config::GenerationStep;
use crate::entity::{self, ChildProfile, Entity, Roster};
use crate::session::{Phase, Session, SessionUpdate};

impl StoryWorkflow {
    /// Show the roster with the model's proposal, proposing first if needed.
    pub(super) async fn serve_companions(
        &self,
        session: &Session,
        child: &ChildProfile,
    ) -> Result<PhaseOutput, WorkflowError> {
        let roster = entity::eligible_roster(self.store.as_ref(), child).await?;

        let session = if session.proposed_companion_ids.is_empty() {
            let proposed = self.propose_companions(session, &roster).await?;
            self.store
                .update_session(
                    &session.id,
                    SessionUpdate::new()
                        .phase(Phase::CharacterSelection)
                        .proposed_companions(proposed),
                )
                .await?
        } else if session.phase.is_none() {
            self.store
                .update_session(&session.id, SessionUpdate::new().phase(Phase::CharacterSelection))
                .await?
        } else {
            session.clone()
        };

        Ok(character_selection(&roster, &session))
    }

    /// Lock in the cast and move on to scenarios.
    pub(super) async fn confirm_companions(
        &self,
        session: &Session,
        child: &ChildProfile,
        requested: &[String],
    ) -> Result<PhaseOutput, WorkflowError> {
        let roster = entity::eligible_roster(self.store.as_ref(), child).await?;

        let requested = entity::clean_ids(requested);
        let source = if requested.is_empty() {
            &session.proposed_companion_ids
        } else {
            &requested
        };
        let selected = roster.normalize_selection(source);

        tracing::info!(
            session_id = %session.id,
            companions = selected.len(),
            "Companions confirmed"
        );

        let session = self
            .store
            .update_session(
                &session.id,
                SessionUpdate::new()
                    .selected_companions(selected)
                    .phase(Phase::ScenarioSelection)
                    .reset_downstream(),
            )
            .await?;

        self.serve_scenarios(&session, child).await
    }

    /// Go back to companion selection, discarding later choices.
    pub(super) async fn change_companions(
        &self,
        session: &Session,
        child: &ChildProfile,
    ) -> Result<PhaseOutput, WorkflowError> {
        tracing::info!(
            session_id = %session.id,
            from = session.phase.map(|p| p.name()).unwrap_or("none"),
            "Returning to companion selection"
        );
        let session = self
            .store
            .update_session(
                &session.id,
                SessionUpdate::new()
                    .phase(Phase::CharacterSelection)
                    .reset_downstream(),
            )
            .await?;
        self.serve_companions(&session, child).await
    }

    async fn propose_companions(
        &self,
        session: &Session,
        roster: &Roster,
    ) -> Result<Vec<String>, WorkflowError> {
        // Nobody to choose between.
        if roster.len() <= 1 {
            return Ok(vec![roster.primary_id().to_string()]);
        }

        let child = roster.get(roster.primary_id()).cloned().ok_or_else(|| {
            WorkflowError::MissingPrerequisite("Primary child missing from roster".to_string())
        })?;
        let proposal: CompanionProposal = self
            .generate(
                GenerationStep::CompanionProposal,
                &session.id,
                self.settings(GenerationStep::CompanionProposal),
                prompts::companion_prompt(&child, roster.members()),
            )
            .await?;

        Ok(roster.normalize_selection(&proposal.companion_ids))
    }
}

fn character_selection(roster: &Roster, session: &Session) -> PhaseOutput {
    PhaseOutput::CharacterSelection {
        primary_id: roster.primary_id().to_string(),
        roster: roster.members().iter().map(Entity::clone).collect(),
        proposed_ids: session.proposed_companion_ids.clone(),
        selected_ids: session.selected_companion_ids.clone(),
    }
}
