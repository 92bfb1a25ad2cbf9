//! File-based conversation store — one pretty-printed JSON array.
//!
//! Storage location: `~/.lantern/chats.json` unless configured otherwise.
//! Records are kept most-recent-first, matching what the UI lists.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lantern_core::error::StoreError;
use lantern_core::store::{ChatId, ChatRecord, ConversationStore, Turn, append_and_promote};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed store.
///
/// Chats are loaded into memory on open and the whole file is rewritten on
/// every mutation. Writes go through a temporary file and a rename.
pub struct FileStore {
    path: PathBuf,
    chats: Arc<RwLock<Vec<ChatRecord>>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file starts empty; it is created on
    /// the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let chats = Self::load_from_disk(&path)?;
        debug!(path = %path.display(), count = chats.len(), "Chat store loaded");
        Ok(Self {
            path,
            chats: Arc::new(RwLock::new(chats)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the chat array. Records that fail to decode are skipped.
    fn load_from_disk(path: &Path) -> Result<Vec<ChatRecord>, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<serde_json::Value> = serde_json::from_str(&content)
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))?;

        Ok(raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<ChatRecord>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted chat record");
                    None
                }
            })
            .collect())
    }

    async fn flush(&self, chats: &[ChatRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Storage(format!("Failed to create chat directory: {e}"))
            })?;
        }

        let json = serde_json::to_string_pretty(chats)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write chat file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to replace chat file: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load_all(&self) -> Result<Vec<ChatRecord>, StoreError> {
        Ok(self.chats.read().await.clone())
    }

    async fn save_all(&self, chats: Vec<ChatRecord>) -> Result<(), StoreError> {
        let mut guard = self.chats.write().await;
        self.flush(&chats).await?;
        *guard = chats;
        Ok(())
    }

    async fn lookup(&self, id: &ChatId) -> Result<Option<ChatRecord>, StoreError> {
        Ok(self.chats.read().await.iter().find(|c| &c.id == id).cloned())
    }

    async fn append_turn(&self, id: &ChatId, turn: Turn) -> Result<ChatRecord, StoreError> {
        // Hold the write lock across the flush so concurrent appends serialize.
        let mut guard = self.chats.write().await;
        let mut updated = guard.clone();
        let record = append_and_promote(&mut updated, id, turn);
        self.flush(&updated).await?;
        *guard = updated;
        debug!(chat_id = %id, turns = record.conversation.len(), "Turn appended");
        Ok(record)
    }
}
