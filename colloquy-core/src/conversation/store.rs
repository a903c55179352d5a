//! Conversation persistence
//!
//! The engine only mutates the in-memory record it is bound to; when and where
//! that record is persisted is decided by a [`ConversationStore`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ColloquyError, Result};

use super::history::Conversation;

/// Trait for conversation storage backends
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a new conversation. Fails if the id already exists.
    async fn insert(&self, conversation: &Conversation) -> Result<()>;

    /// Delete a conversation. Returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Persist the current state of a conversation (insert or overwrite)
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// Load a conversation by id
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// All conversations, most recently active first
    async fn list(&self) -> Result<Vec<Conversation>>;
}

fn sort_by_recent_activity(conversations: &mut [Conversation]) {
    conversations.sort_by_key(|c| std::cmp::Reverse(c.last_message_timestamp()));
}

/// In-memory conversation store
pub struct InMemoryConversationStore {
    conversations: Arc<RwLock<HashMap<Uuid, Conversation>>>,
}

impl InMemoryConversationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn insert(&self, conversation: &Conversation) -> Result<()> {
        let mut storage = self.conversations.write().await;
        if storage.contains_key(&conversation.id()) {
            return Err(ColloquyError::Storage(format!(
                "Conversation {} already exists",
                conversation.id()
            )));
        }
        storage.insert(conversation.id(), conversation.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.conversations.write().await.remove(&id).is_some())
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .write()
            .await
            .insert(conversation.id(), conversation.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        let mut all: Vec<_> = self.conversations.read().await.values().cloned().collect();
        sort_by_recent_activity(&mut all);
        Ok(all)
    }
}

/// Stores each conversation as `<id>.json` in a directory
pub struct JsonFileConversationStore {
    dir: PathBuf,
}

impl JsonFileConversationStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Directory holding the conversation files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn write(&self, conversation: &Conversation) -> Result<()> {
        let json = conversation.to_json()?;
        let path = self.path_for(conversation.id());
        // Write-then-rename so a crash never leaves a half-written record
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for JsonFileConversationStore {
    async fn insert(&self, conversation: &Conversation) -> Result<()> {
        if tokio::fs::try_exists(self.path_for(conversation.id())).await? {
            return Err(ColloquyError::Storage(format!(
                "Conversation {} already exists",
                conversation.id()
            )));
        }
        self.write(conversation).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.write(conversation).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        match tokio::fs::read_to_string(self.path_for(id)).await {
            Ok(json) => Ok(Some(Conversation::from_json(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Conversation>> {
        let mut all = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = tokio::fs::read_to_string(&path).await?;
            match Conversation::from_json(&json) {
                Ok(conversation) => all.push(conversation),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable conversation: {}", e);
                }
            }
        }
        sort_by_recent_activity(&mut all);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Message, Role};
    use chrono::{Duration, Utc};

    fn conversation_at(offset_secs: i64) -> Conversation {
        let mut conversation = Conversation::new();
        conversation.append(Message::at(
            Role::User,
            "hello",
            None,
            Utc::now() + Duration::seconds(offset_secs),
        ));
        conversation
    }

    #[tokio::test]
    async fn test_in_memory_insert_get_delete() {
        let store = InMemoryConversationStore::new();
        let conversation = conversation_at(0);

        store.insert(&conversation).await.unwrap();
        assert!(store.insert(&conversation).await.is_err());
        assert_eq!(store.get(conversation.id()).await.unwrap(), Some(conversation.clone()));

        assert!(store.delete(conversation.id()).await.unwrap());
        assert!(!store.delete(conversation.id()).await.unwrap());
        assert!(store.get(conversation.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_list_most_recent_first() {
        let store = InMemoryConversationStore::new();
        let older = conversation_at(-60);
        let newer = conversation_at(0);
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].id(), newer.id());
        assert_eq!(listed[1].id(), older.id());
    }

    #[tokio::test]
    async fn test_file_store_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileConversationStore::open(dir.path()).await.unwrap();

        let mut conversation = conversation_at(0);
        store.insert(&conversation).await.unwrap();

        conversation.replace_summary("Greetings.");
        store.save(&conversation).await.unwrap();

        let loaded = store.get(conversation.id()).await.unwrap().unwrap();
        assert_eq!(loaded.summary(), Some("Greetings."));
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.delete(conversation.id()).await.unwrap());
        assert!(store.get(conversation.id()).await.unwrap().is_none());
    }
}
