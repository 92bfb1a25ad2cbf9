//! Conversation store trait — persisted chat history.
//!
//! The core only needs append and lookup. Records are kept most-recent-first:
//! appending a turn moves its chat to the front.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Category assigned to chats that have not been filed anywhere.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Unique identifier for a stored chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One question/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub response: String,
    #[serde(default)]
    pub has_image: bool,
    /// Base64 image sent with the question, kept so the chat can show it again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

impl Turn {
    pub fn new(question: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            question: question.into(),
            response: response.into(),
            has_image: false,
            image_data: None,
        }
    }

    /// Attach the image the question was asked about.
    pub fn with_image(mut self, data: impl Into<String>) -> Self {
        self.has_image = true;
        self.image_data = Some(data.into());
        self
    }
}

/// A stored chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,

    /// When the chat was last updated
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub conversation: Vec<Turn>,

    #[serde(default = "default_category")]
    pub category_id: String,
}

fn default_category() -> String {
    UNCATEGORIZED.into()
}

impl ChatRecord {
    pub fn new(id: ChatId) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            conversation: Vec::new(),
            category_id: default_category(),
        }
    }
}

/// Append `turn` to chat `id` (creating it if needed) and move that chat to
/// the front of `chats`. Returns the updated record.
pub fn append_and_promote(chats: &mut Vec<ChatRecord>, id: &ChatId, turn: Turn) -> ChatRecord {
    let mut record = match chats.iter().position(|c| &c.id == id) {
        Some(pos) => chats.remove(pos),
        None => ChatRecord::new(id.clone()),
    };
    record.conversation.push(turn);
    record.timestamp = Utc::now();
    chats.insert(0, record.clone());
    record
}

/// Persisted chat history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// All chats, most recent first.
    async fn load_all(&self) -> Result<Vec<ChatRecord>, StoreError>;

    /// Replace the stored chats.
    async fn save_all(&self, chats: Vec<ChatRecord>) -> Result<(), StoreError>;

    /// Look up a chat by id.
    async fn lookup(&self, id: &ChatId) -> Result<Option<ChatRecord>, StoreError>;

    /// Append a turn and promote the chat to the front.
    async fn append_turn(&self, id: &ChatId, turn: Turn) -> Result<ChatRecord, StoreError>;
}
