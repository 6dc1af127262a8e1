//! The compiled story - the artifact a finished session produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one enrichment job on a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    #[default]
    Idle,
    Running,
    Ready,
    Error,
}

/// The enrichment jobs that run after a story is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Narration audio synthesis.
    Narration,
    /// Composite portrait of the participants.
    Portrait,
    /// A polished title.
    TitleRefinement,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Narration, JobKind::Portrait, JobKind::TitleRefinement];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Narration => "narration",
            JobKind::Portrait => "portrait",
            JobKind::TitleRefinement => "title_refinement",
        }
    }
}

/// Sub-status a single enrichment job owns on the story.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub status: EnrichmentStatus,
    /// Asset URL or refined text, once ready.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Enrichment {
    pub fn running(at: DateTime<Utc>) -> Self {
        Self {
            status: EnrichmentStatus::Running,
            output: None,
            error: None,
            updated_at: Some(at),
        }
    }

    pub fn ready(output: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: EnrichmentStatus::Ready,
            output: Some(output.into()),
            error: None,
            updated_at: Some(at),
        }
    }

    pub fn failed(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: EnrichmentStatus::Error,
            output: None,
            error: Some(error.into()),
            updated_at: Some(at),
        }
    }
}

/// A compiled story, keyed by the id of the session that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub child_id: String,
    pub title: String,
    pub mood: String,
    /// Narrative with every resolvable placeholder already substituted.
    pub text: String,
    /// Companion roster the story was written for, primary child first.
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub style_id: Option<String>,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub narration: Enrichment,
    #[serde(default)]
    pub portrait: Enrichment,
    #[serde(default)]
    pub title_refinement: Enrichment,
}

impl Story {
    pub fn enrichment(&self, kind: JobKind) -> &Enrichment {
        match kind {
            JobKind::Narration => &self.narration,
            JobKind::Portrait => &self.portrait,
            JobKind::TitleRefinement => &self.title_refinement,
        }
    }

    pub fn enrichment_mut(&mut self, kind: JobKind) -> &mut Enrichment {
        match kind {
            JobKind::Narration => &mut self.narration,
            JobKind::Portrait => &mut self.portrait,
            JobKind::TitleRefinement => &mut self.title_refinement,
        }
    }

    /// Refined title when title refinement succeeded, the compiled one otherwise.
    pub fn display_title(&self) -> &str {
        match (&self.title_refinement.status, &self.title_refinement.output) {
            (EnrichmentStatus::Ready, Some(refined)) if !refined.trim().is_empty() => refined,
            _ => &self.title,
        }
    }
}
