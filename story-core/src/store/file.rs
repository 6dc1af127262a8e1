use super::{DocumentStore, SessionMutation, StoreError, StoryMutation};
use crate::clock::{Clock, SystemClock};
use crate::entity::{Character, ChildProfile};
use crate::session::Session;
use crate::story::Story;
use crate::trace::GenerationTrace;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const SESSIONS: &str = "sessions";
const STORIES: &str = "stories";
const CHILDREN: &str = "children";
const CHARACTERS: &str = "characters";
const TRACES_FILE: &str = "traces.jsonl";

/// JSON-file store: one pretty-printed document per file, one directory per
/// collection, and generation traces appended to a JSON-lines file.
///
/// Writes go to a temporary file that is renamed into place, so a crash
/// never leaves a half-written document behind.
pub struct FileStore {
    root: PathBuf,
    /// Serializes read-modify-write transactions and trace appends.
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for collection in [SESSIONS, STORIES, CHILDREN, CHARACTERS] {
            fs::create_dir_all(root.join(collection)).await?;
        }
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn put_child(&self, child: &ChildProfile) -> Result<(), StoreError> {
        self.write_doc(CHILDREN, &child.id, child).await
    }

    pub async fn put_character(&self, character: &Character) -> Result<(), StoreError> {
        self.write_doc(CHARACTERS, &character.id, character).await
    }

    /// Read back every trace, oldest first.
    pub async fn traces(&self) -> Result<Vec<GenerationTrace>, StoreError> {
        let path = self.root.join(TRACES_FILE);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }

    /// Percent-encode the id into the file stem, so distinct ids never
    /// share a file and no id can name a path outside its collection.
    fn doc_path(&self, collection: &str, id: &str) -> Result<PathBuf, StoreError> {
        if id.trim().is_empty() {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self
            .root
            .join(collection)
            .join(format!("{}.json", urlencoding::encode(id))))
    }

    async fn read_doc<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StoreError> {
        match fs::read_to_string(self.doc_path(collection, id)?).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_doc<T: Serialize + Sync>(
        &self,
        collection: &str,
        id: &str,
        doc: &T,
    ) -> Result<(), StoreError> {
        let path = self.doc_path(collection, id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(doc)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        let mut docs = Vec::new();
        let mut entries = fs::read_dir(self.root.join(collection)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            docs.push(serde_json::from_str(&content)?);
        }
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.read_doc(SESSIONS, id).await
    }

    async fn put_session(&self, session: Session) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_doc(SESSIONS, &session.id, &session).await
    }

    async fn transact_session(
        &self,
        id: &str,
        mutation: SessionMutation<'_>,
    ) -> Result<Session, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut session: Session = self
            .read_doc(SESSIONS, id)
            .await?
            .ok_or_else(|| StoreError::not_found(SESSIONS, id))?;

        let before = session.clone();
        if !mutation(&mut session) {
            return Ok(before);
        }
        session.updated_at = self.clock.now();
        self.write_doc(SESSIONS, id, &session).await?;
        Ok(session)
    }

    async fn get_story(&self, id: &str) -> Result<Option<Story>, StoreError> {
        self.read_doc(STORIES, id).await
    }

    async fn put_story(&self, story: Story) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_doc(STORIES, &story.id, &story).await
    }

    async fn create_story(&self, story: Story) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(self.doc_path(STORIES, &story.id)?).await? {
            return Ok(false);
        }
        self.write_doc(STORIES, &story.id, &story).await?;
        Ok(true)
    }

    async fn transact_story(
        &self,
        id: &str,
        mutation: StoryMutation<'_>,
    ) -> Result<Story, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut story: Story = self
            .read_doc(STORIES, id)
            .await?
            .ok_or_else(|| StoreError::not_found(STORIES, id))?;
        mutation(&mut story);
        self.write_doc(STORIES, id, &story).await?;
        Ok(story)
    }

    async fn get_child(&self, id: &str) -> Result<Option<ChildProfile>, StoreError> {
        self.read_doc(CHILDREN, id).await
    }

    async fn get_character(&self, id: &str) -> Result<Option<Character>, StoreError> {
        self.read_doc(CHARACTERS, id).await
    }

    async fn children_of_owner(&self, owner_id: &str) -> Result<Vec<ChildProfile>, StoreError> {
        let children: Vec<ChildProfile> = self.read_all(CHILDREN).await?;
        Ok(children.into_iter().filter(|c| c.owner_id == owner_id).collect())
    }

    async fn characters_of_owner(&self, owner_id: &str) -> Result<Vec<Character>, StoreError> {
        let characters: Vec<Character> = self.read_all(CHARACTERS).await?;
        Ok(characters
            .into_iter()
            .filter(|c| c.owner_id == owner_id)
            .collect())
    }

    async fn append_trace(&self, trace: GenerationTrace) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&trace)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(TRACES_FILE))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
