use super::{DocumentStore, SessionMutation, StoreError, StoryMutation};
use crate::clock::{Clock, SystemClock};
use crate::entity::{Character, ChildProfile};
use crate::session::Session;
use crate::story::Story;
use crate::trace::GenerationTrace;
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process store. Used by tests and the headless runner.
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    stories: RwLock<HashMap<String, Story>>,
    children: RwLock<HashMap<String, ChildProfile>>,
    characters: RwLock<HashMap<String, Character>>,
    traces: RwLock<Vec<GenerationTrace>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            stories: RwLock::new(HashMap::new()),
            children: RwLock::new(HashMap::new()),
            characters: RwLock::new(HashMap::new()),
            traces: RwLock::new(Vec::new()),
            clock,
        }
    }

    pub async fn insert_child(&self, child: ChildProfile) {
        self.children.write().await.insert(child.id.clone(), child);
    }

    pub async fn insert_character(&self, character: Character) {
        self.characters
            .write()
            .await
            .insert(character.id.clone(), character);
    }

    /// Every trace appended so far, oldest first.
    pub async fn traces(&self) -> Vec<GenerationTrace> {
        self.traces.read().await.clone()
    }

    pub async fn story_count(&self) -> usize {
        self.stories.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn put_session(&self, session: Session) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn transact_session(
        &self,
        id: &str,
        mutation: SessionMutation<'_>,
    ) -> Result<Session, StoreError> {
        // The write guard is held across the mutation, so concurrent
        // transactions on the same store serialize.
        let mut sessions = self.sessions.write().await;
        let current = sessions
            .get(id)
            .ok_or_else(|| StoreError::not_found("sessions", id))?;

        let mut draft = current.clone();
        if !mutation(&mut draft) {
            return Ok(current.clone());
        }
        draft.updated_at = self.clock.now();
        sessions.insert(id.to_string(), draft.clone());
        Ok(draft)
    }

    async fn get_story(&self, id: &str) -> Result<Option<Story>, StoreError> {
        Ok(self.stories.read().await.get(id).cloned())
    }

    async fn put_story(&self, story: Story) -> Result<(), StoreError> {
        self.stories.write().await.insert(story.id.clone(), story);
        Ok(())
    }

    async fn create_story(&self, story: Story) -> Result<bool, StoreError> {
        match self.stories.write().await.entry(story.id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(story);
                Ok(true)
            }
        }
    }

    async fn transact_story(
        &self,
        id: &str,
        mutation: StoryMutation<'_>,
    ) -> Result<Story, StoreError> {
        let mut stories = self.stories.write().await;
        let story = stories
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("stories", id))?;
        mutation(story);
        Ok(story.clone())
    }

    async fn get_child(&self, id: &str) -> Result<Option<ChildProfile>, StoreError> {
        Ok(self.children.read().await.get(id).cloned())
    }

    async fn get_character(&self, id: &str) -> Result<Option<Character>, StoreError> {
        Ok(self.characters.read().await.get(id).cloned())
    }

    async fn children_of_owner(&self, owner_id: &str) -> Result<Vec<ChildProfile>, StoreError> {
        Ok(self
            .children
            .read()
            .await
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn characters_of_owner(&self, owner_id: &str) -> Result<Vec<Character>, StoreError> {
        Ok(self
            .characters
            .read()
            .await
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn append_trace(&self, trace: GenerationTrace) -> Result<(), StoreError> {
        self.traces.write().await.push(trace);
        Ok(())
    }
}
