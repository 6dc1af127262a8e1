//! Document persistence.
//!
//! The workflow keeps all of its state in a [`DocumentStore`]: sessions,
//! compiled stories, generation traces, and read-only access to the
//! family's child profiles and characters. Every session write goes
//! through [`DocumentStore::transact_session`], a read-modify-write that
//! the store runs atomically per document.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::entity::{Character, ChildProfile};
use crate::session::{Session, SessionUpdate};
use crate::story::{Enrichment, JobKind, Story};
use crate::trace::GenerationTrace;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} document '{id}' not found")]
    NotFound { collection: &'static str, id: String },

    #[error("Invalid document id '{0}'")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(collection: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            collection,
            id: id.into(),
        }
    }
}

/// Read-modify-write step for a session. Return `false` to abort without
/// writing anything.
pub type SessionMutation<'a> = Box<dyn FnOnce(&mut Session) -> bool + Send + 'a>;

/// Read-modify-write step for a story.
pub type StoryMutation<'a> = Box<dyn FnOnce(&mut Story) + Send + 'a>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Insert or replace a session.
    async fn put_session(&self, session: Session) -> Result<(), StoreError>;

    /// Atomically load a session, apply `mutation`, and commit if it
    /// returned `true`. Returns the session as it stands afterwards.
    /// Committed writes get a fresh `updated_at`.
    async fn transact_session(
        &self,
        id: &str,
        mutation: SessionMutation<'_>,
    ) -> Result<Session, StoreError>;

    async fn get_story(&self, id: &str) -> Result<Option<Story>, StoreError>;

    /// Insert or replace a story.
    async fn put_story(&self, story: Story) -> Result<(), StoreError>;

    /// Insert a story only if none exists under its id yet. Returns whether
    /// this call wrote it.
    async fn create_story(&self, story: Story) -> Result<bool, StoreError>;

    /// Atomically load a story, apply `mutation`, and write it back.
    async fn transact_story(
        &self,
        id: &str,
        mutation: StoryMutation<'_>,
    ) -> Result<Story, StoreError>;

    async fn get_child(&self, id: &str) -> Result<Option<ChildProfile>, StoreError>;

    async fn get_character(&self, id: &str) -> Result<Option<Character>, StoreError>;

    /// All child profiles on an account, deleted ones included.
    async fn children_of_owner(&self, owner_id: &str) -> Result<Vec<ChildProfile>, StoreError>;

    /// All characters on an account, deleted ones included.
    async fn characters_of_owner(&self, owner_id: &str) -> Result<Vec<Character>, StoreError>;

    async fn append_trace(&self, trace: GenerationTrace) -> Result<(), StoreError>;

    /// Merge the set fields of `update` into a session.
    async fn update_session(&self, id: &str, update: SessionUpdate) -> Result<Session, StoreError> {
        self.transact_session(
            id,
            Box::new(move |session| {
                update.apply(session);
                true
            }),
        )
        .await
    }

    /// Overwrite one enrichment sub-status, leaving the others alone.
    async fn set_enrichment(
        &self,
        story_id: &str,
        kind: JobKind,
        enrichment: Enrichment,
    ) -> Result<Story, StoreError> {
        self.transact_story(
            story_id,
            Box::new(move |story| {
                *story.enrichment_mut(kind) = enrichment;
            }),
        )
        .await
    }
}
