//! scenario_selection: offering and picking an adventure premise.

use super::contracts::{relabel_if_ambiguous, ScenarioBatch};
use super::{prompts, PhaseOutput, StoryWorkflow, WorkflowError};
use crate::config::GenerationStep;
use crate::entity::{self, AgeBand, ChildProfile};
use crate::session::{Phase, Session, SessionUpdate};

impl StoryWorkflow {
    /// Show the scenarios, generating them on first entry.
    pub(super) async fn serve_scenarios(
        &self,
        session: &Session,
        child: &ChildProfile,
    ) -> Result<PhaseOutput, WorkflowError> {
        if !session.scenarios.is_empty() {
            return Ok(scenario_selection(session));
        }

        if session.selected_companion_ids.is_empty() {
            return Err(WorkflowError::MissingPrerequisite(
                "Choose companions before picking an adventure".to_string(),
            ));
        }

        let map = entity::resolve_all(self.store.as_ref(), &session.selected_companion_ids).await?;
        let cast = entity::ordered(&session.selected_companion_ids, &map);
        let prompt = prompts::scenario_prompt(&cast, AgeBand::from_age(child.age));

        let mut batch: ScenarioBatch = self
            .generate(
                GenerationStep::Scenarios,
                &session.id,
                self.settings(GenerationStep::Scenarios),
                prompt,
            )
            .await?;
        relabel_if_ambiguous(&mut batch.scenarios, |s| &mut s.id);

        tracing::info!(
            session_id = %session.id,
            scenarios = batch.scenarios.len(),
            "Scenarios generated"
        );

        let session = self
            .store
            .update_session(
                &session.id,
                SessionUpdate::new()
                    .phase(Phase::ScenarioSelection)
                    .scenarios(batch.scenarios)
                    .selected_scenario(None),
            )
            .await?;

        Ok(scenario_selection(&session))
    }

    /// Record the picked scenario and move on to synopses.
    pub(super) async fn select_scenario(
        &self,
        session: &Session,
        child: &ChildProfile,
        option_id: &str,
    ) -> Result<PhaseOutput, WorkflowError> {
        if session.scenarios.is_empty() {
            return Err(WorkflowError::MissingPrerequisite(
                "There are no adventures to choose from yet".to_string(),
            ));
        }
        if !session.scenarios.iter().any(|s| s.id == option_id) {
            return Err(WorkflowError::MissingPrerequisite(format!(
                "Unknown adventure '{option_id}'"
            )));
        }

        tracing::info!(session_id = %session.id, scenario = option_id, "Scenario selected");

        let session = self
            .store
            .update_session(
                &session.id,
                SessionUpdate::new()
                    .selected_scenario(Some(option_id.to_string()))
                    .reset_synopses()
                    .phase(Phase::SynopsisSelection),
            )
            .await?;

        self.generate_synopses(&session, child, false).await
    }
}

fn scenario_selection(session: &Session) -> PhaseOutput {
    PhaseOutput::ScenarioSelection {
        companion_ids: session.selected_companion_ids.clone(),
        scenarios: session.scenarios.clone(),
        selected_id: session.selected_scenario_id.clone(),
    }
}
