//! Session documents - the persisted state of one story-building flow.
//!
//! A session is created when a child starts building a story and is then
//! mutated only by the workflow. Every call to the workflow is stateless;
//! whatever must survive between calls lives here.

use crate::contract::OutputContract;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a session is in the story pipeline.
///
/// Phases only move forward, except when the child explicitly asks to
/// change companions before the story is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    CharacterSelection,
    ScenarioSelection,
    SynopsisSelection,
    StoryGeneration,
    Complete,
}

impl Phase {
    /// Wire name of the phase.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::CharacterSelection => "character_selection",
            Phase::ScenarioSelection => "scenario_selection",
            Phase::SynopsisSelection => "synopsis_selection",
            Phase::StoryGeneration => "story_generation",
            Phase::Complete => "complete",
        }
    }

    /// The phase that follows this one, if any.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::CharacterSelection => Some(Phase::ScenarioSelection),
            Phase::ScenarioSelection => Some(Phase::SynopsisSelection),
            Phase::SynopsisSelection => Some(Phase::StoryGeneration),
            Phase::StoryGeneration => Some(Phase::Complete),
            Phase::Complete => None,
        }
    }

    /// Whether the child is still making choices in this phase.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Phase::CharacterSelection | Phase::ScenarioSelection | Phase::SynopsisSelection
        )
    }
}

/// Coarse lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    InProgress,
    Completed,
}

/// An adventure premise offered to the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, OutputContract)]
#[contract(name = "scenario_option")]
pub struct ScenarioOption {
    /// Short unique label such as "A"
    #[contract(non_empty)]
    pub id: String,
    /// Catchy title of the adventure
    #[contract(non_empty)]
    pub title: String,
    /// Two or three sentences setting up the adventure
    #[contract(non_empty)]
    pub description: String,
}

/// A plot outline offered for the chosen scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, OutputContract)]
#[contract(name = "synopsis_option")]
pub struct SynopsisOption {
    /// Short unique label such as "A"
    #[contract(non_empty)]
    pub id: String,
    /// Title of this plot
    #[contract(non_empty)]
    pub title: String,
    /// Beginning, middle and end in a short paragraph
    #[contract(non_empty)]
    pub summary: String,
}

/// Persisted state of one story-building flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    /// The child the story is for. Always part of the companion roster.
    pub child_id: String,

    /// Absent until the workflow first touches the session.
    #[serde(default)]
    pub phase: Option<Phase>,

    /// Finalized roster, primary child first. Empty until confirmed.
    #[serde(default)]
    pub selected_companion_ids: Vec<String>,

    /// Roster the model suggested.
    #[serde(default)]
    pub proposed_companion_ids: Vec<String>,

    #[serde(default)]
    pub scenarios: Vec<ScenarioOption>,

    #[serde(default)]
    pub selected_scenario_id: Option<String>,

    /// Latest batch only; regeneration replaces it.
    #[serde(default)]
    pub synopses: Vec<SynopsisOption>,

    #[serde(default)]
    pub selected_synopsis_id: Option<String>,

    #[serde(default)]
    pub compile_in_progress: bool,

    #[serde(default)]
    pub compile_started_at: Option<DateTime<Utc>>,

    /// Request that holds (or last held) the compile lock.
    #[serde(default)]
    pub compile_request_id: Option<String>,

    /// Message of the last failed compile.
    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub status: SessionStatus,

    /// Output style requested for the finished story.
    #[serde(default)]
    pub style_id: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Assigned by the store on every committed write.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session for a child.
    pub fn new(id: impl Into<String>, child_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            child_id: child_id.into(),
            phase: None,
            selected_companion_ids: Vec::new(),
            proposed_companion_ids: Vec::new(),
            scenarios: Vec::new(),
            selected_scenario_id: None,
            synopses: Vec::new(),
            selected_synopsis_id: None,
            compile_in_progress: false,
            compile_started_at: None,
            compile_request_id: None,
            last_error: None,
            status: SessionStatus::InProgress,
            style_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the requested output style.
    pub fn with_style(mut self, style_id: impl Into<String>) -> Self {
        self.style_id = Some(style_id.into());
        self
    }

    /// The scenario the child picked, if it is still on offer.
    pub fn selected_scenario(&self) -> Option<&ScenarioOption> {
        let id = self.selected_scenario_id.as_deref()?;
        self.scenarios.iter().find(|s| s.id == id)
    }

    /// The synopsis the child picked, if it is still on offer.
    pub fn selected_synopsis(&self) -> Option<&SynopsisOption> {
        let id = self.selected_synopsis_id.as_deref()?;
        self.synopses.iter().find(|s| s.id == id)
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// The fields a workflow step owns and writes back.
///
/// Unset fields are left untouched, so a step never overwrites state it
/// did not compute. `Option<Option<_>>` fields distinguish "leave alone"
/// from "clear".
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub phase: Option<Phase>,
    pub proposed_companion_ids: Option<Vec<String>>,
    pub selected_companion_ids: Option<Vec<String>>,
    pub scenarios: Option<Vec<ScenarioOption>>,
    pub selected_scenario_id: Option<Option<String>>,
    pub synopses: Option<Vec<SynopsisOption>>,
    pub selected_synopsis_id: Option<Option<String>>,
    pub status: Option<SessionStatus>,
    pub style_id: Option<Option<String>>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn proposed_companions(mut self, ids: Vec<String>) -> Self {
        self.proposed_companion_ids = Some(ids);
        self
    }

    pub fn selected_companions(mut self, ids: Vec<String>) -> Self {
        self.selected_companion_ids = Some(ids);
        self
    }

    pub fn scenarios(mut self, scenarios: Vec<ScenarioOption>) -> Self {
        self.scenarios = Some(scenarios);
        self
    }

    pub fn selected_scenario(mut self, id: Option<String>) -> Self {
        self.selected_scenario_id = Some(id);
        self
    }

    pub fn synopses(mut self, synopses: Vec<SynopsisOption>) -> Self {
        self.synopses = Some(synopses);
        self
    }

    pub fn selected_synopsis(mut self, id: Option<String>) -> Self {
        self.selected_synopsis_id = Some(id);
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn style(mut self, style_id: Option<String>) -> Self {
        self.style_id = Some(style_id);
        self
    }

    /// Discard everything chosen after the companion roster.
    pub fn reset_downstream(self) -> Self {
        self.scenarios(Vec::new())
            .selected_scenario(None)
            .reset_synopses()
    }

    /// Discard the synopsis batch and any pick from it.
    pub fn reset_synopses(self) -> Self {
        self.synopses(Vec::new()).selected_synopsis(None)
    }

    /// Write the set fields into a session.
    pub fn apply(self, session: &mut Session) {
        if let Some(phase) = self.phase {
            session.phase = Some(phase);
        }
        if let Some(ids) = self.proposed_companion_ids {
            session.proposed_companion_ids = ids;
        }
        if let Some(ids) = self.selected_companion_ids {
            session.selected_companion_ids = ids;
        }
        if let Some(scenarios) = self.scenarios {
            session.scenarios = scenarios;
        }
        if let Some(id) = self.selected_scenario_id {
            session.selected_scenario_id = id;
        }
        if let Some(synopses) = self.synopses {
            session.synopses = synopses;
        }
        if let Some(id) = self.selected_synopsis_id {
            session.selected_synopsis_id = id;
        }
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(style_id) = self.style_id {
            session.style_id = style_id;
        }
    }
}
