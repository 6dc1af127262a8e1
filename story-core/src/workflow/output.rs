//! Request and response shapes for the workflow.

use crate::entity::Entity;
use crate::session::{ScenarioOption, SynopsisOption};
use crate::story::Story;
use serde::{Deserialize, Serialize};

/// Explicit intent attached to an advance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ConfirmCompanions,
    ChangeCompanions,
    MoreSynopses,
}

/// One step of the interactive flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvanceRequest {
    /// Must match the session's child when given.
    #[serde(default)]
    pub child_id: String,
    pub session_id: String,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub selected_companion_ids: Vec<String>,
    #[serde(default)]
    pub selected_option_id: Option<String>,
}

impl AdvanceRequest {
    pub fn new(child_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_companions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_companion_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_option(mut self, id: impl Into<String>) -> Self {
        self.selected_option_id = Some(id.into());
        self
    }

    /// The selected option id, if it is not blank.
    pub(crate) fn option_id(&self) -> Option<&str> {
        self.selected_option_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// What the client should show next. Built per response, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseOutput {
    CharacterSelection {
        primary_id: String,
        /// Everyone eligible, primary child first.
        roster: Vec<Entity>,
        proposed_ids: Vec<String>,
        /// Current confirmed selection; empty before confirmation.
        selected_ids: Vec<String>,
    },
    ScenarioSelection {
        companion_ids: Vec<String>,
        scenarios: Vec<ScenarioOption>,
        selected_id: Option<String>,
    },
    SynopsisSelection {
        scenario: ScenarioOption,
        synopses: Vec<SynopsisOption>,
    },
    Finished {
        story_id: String,
        title: String,
        mood: String,
        text: String,
        participant_ids: Vec<String>,
    },
    Error {
        error: String,
        /// Another request is compiling this session right now.
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        in_progress: bool,
    },
}

impl PhaseOutput {
    pub fn finished(story: &Story) -> Self {
        PhaseOutput::Finished {
            story_id: story.id.clone(),
            title: story.display_title().to_string(),
            mood: story.mood.clone(),
            text: story.text.clone(),
            participant_ids: story.participant_ids.clone(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PhaseOutput::Error {
            error: message.into(),
            in_progress: false,
        }
    }

    /// Wire name of the state.
    pub fn state(&self) -> &'static str {
        match self {
            PhaseOutput::CharacterSelection { .. } => "character_selection",
            PhaseOutput::ScenarioSelection { .. } => "scenario_selection",
            PhaseOutput::SynopsisSelection { .. } => "synopsis_selection",
            PhaseOutput::Finished { .. } => "finished",
            PhaseOutput::Error { .. } => "error",
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, PhaseOutput::Error { .. })
    }
}

/// Wire envelope: `{ "ok": bool, "state": ..., ...fields }`.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub output: PhaseOutput,
}

impl From<PhaseOutput> for AdvanceResponse {
    fn from(output: PhaseOutput) -> Self {
        Self {
            ok: output.is_ok(),
            output,
        }
    }
}
