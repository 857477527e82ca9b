//! File-backed store: the whole state as one JSON document.
//!
//! Reads are served from memory; every mutation rewrites the file. Good
//! enough for a single-user CLI or a local gateway where conversations must
//! survive restarts.
//!
//! Flushes are serialized and each one snapshots the latest state, so the
//! last write on disk always reflects every mutation that finished before
//! it. The document is written to a sibling temporary file and renamed
//! over the store file; a crash leaves either the old or the new version.
//!
//! Storage location: `~/.forgepilot/conversations.json`

use async_trait::async_trait;
use forgepilot_core::error::StoreError;
use forgepilot_core::message::{Conversation, ConversationId, Message};
use forgepilot_core::store::ConversationStore;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::in_memory::{InMemoryStore, StoreData};

pub struct FileStore {
    path: PathBuf,
    inner: InMemoryStore,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`. A missing file starts empty; a corrupt one
    /// is reported and also starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = Self::load_from_disk(&path);
        debug!(
            path = %path.display(),
            conversations = data.conversations.len(),
            "File store loaded"
        );
        Self {
            path,
            inner: InMemoryStore::from_data(data),
            write_lock: Mutex::new(()),
        }
    }

    /// Default path: `~/.forgepilot/conversations.json`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".forgepilot")
            .join("conversations.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> StoreData {
        let Ok(content) = std::fs::read_to_string(path) else {
            return StoreData::default();
        };
        match serde_json::from_str(&content) {
            Ok(data) => data,
            Err(e) => {
                // Keep the unreadable file; the next flush would replace it
                let aside = sibling(path, ".corrupt");
                match std::fs::rename(path, &aside) {
                    Ok(()) => warn!(
                        path = %path.display(),
                        moved_to = %aside.display(),
                        error = %e,
                        "Unreadable store file moved aside, starting empty"
                    ),
                    Err(rename_err) => warn!(
                        path = %path.display(),
                        error = %e,
                        rename_error = %rename_err,
                        "Ignoring unreadable store file"
                    ),
                }
                StoreData::default()
            }
        }
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let _writer = self.write_lock.lock().await;
        let data = self.inner.snapshot().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Storage(format!("Failed to create store directory: {e}")))?;
        }
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize store: {e}")))?;

        let staging = sibling(&self.path, ".tmp");
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write store file: {e}")))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to replace store file: {e}")))
    }
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("conversations.json"));
    name.push(suffix);
    path.with_file_name(name)
}

#[async_trait]
impl ConversationStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StoreError> {
        self.inner.create_conversation(conversation).await?;
        self.flush().await
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
        self.inner.get_conversation(id).await
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.inner.update_conversation(conversation).await?;
        self.flush().await
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        self.inner.append_message(message).await?;
        self.flush().await
    }

    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        self.inner.messages(id).await
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        self.inner.delete_conversation(id).await?;
        self.flush().await
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        self.inner.list_conversations(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conversations.json");

        let conv = Conversation::new("u1");
        let id = conv.id.clone();
        {
            let store = FileStore::open(&path);
            store.create_conversation(conv).await.unwrap();
            store.append_message(Message::user(&id, "hello")).await.unwrap();
        }

        let reopened = FileStore::open(&path);
        let msgs = reopened.messages(&id).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(reopened.get_conversation(&id).await.unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty_and_is_kept_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileStore::open(&path);
        assert!(store.list_conversations("u1").await.unwrap().is_empty());

        store.create_conversation(Conversation::new("u1")).await.unwrap();
        let aside = dir.path().join("conversations.json.corrupt");
        assert_eq!(std::fs::read_to_string(aside).unwrap(), "{ not json");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        let store = Arc::new(FileStore::open(&path));

        let mut ids = Vec::new();
        for _ in 0..8 {
            let conv = Conversation::new("u1");
            ids.push(conv.id.clone());
            store.create_conversation(conv).await.unwrap();
        }

        let writers: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move {
                    for n in 0..25 {
                        store
                            .append_message(Message::user(&id, format!("message {n}")))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let reopened = FileStore::open(&path);
        for id in &ids {
            assert_eq!(reopened.messages(id).await.unwrap().len(), 25);
        }
        assert!(!dir.path().join("conversations.json.tmp").exists());
    }

    #[tokio::test]
    async fn delete_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        let conv = Conversation::new("u1");
        let id = conv.id.clone();

        let store = FileStore::open(&path);
        store.create_conversation(conv).await.unwrap();
        store.delete_conversation(&id).await.unwrap();

        let reopened = FileStore::open(&path);
        assert!(reopened.get_conversation(&id).await.is_err());
    }
}
