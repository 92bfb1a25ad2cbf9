//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the entire system:
//! caller submits a message → history is assembled into a [`Conversation`] →
//! the budget manager trims it → the engine worker generates a reply.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, rules)
    System,
    /// The end user
    User,
    /// The model
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One piece of multimodal message content.
///
/// Media payloads are carried opaquely (typically base64) — only the engine
/// interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image { data: String },
    Audio { data: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    /// Create a new assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// The textual content of this message: text parts joined by a single space.
    /// Media parts contribute nothing.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Structural problems that make a conversation unfit for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("conversation has {0} system messages, at most one is allowed")]
    MultipleSystemMessages(usize),

    #[error("system message must be the first message")]
    SystemNotFirst,

    #[error("conversation has no user message")]
    NoUserMessage,
}

/// An ordered sequence of messages sent to the engine in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The system message, if the conversation has one.
    pub fn system(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::System)
    }

    /// Index of the most recent user message.
    pub fn latest_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    /// System message (if any) followed by the latest user message.
    pub fn minimal(&self) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system() {
            messages.push(system.clone());
        }
        if let Some(idx) = self.latest_user_index() {
            messages.push(self.messages[idx].clone());
        }
        Self { messages }
    }

    /// Check the invariants required before submission to the engine.
    pub fn validate(&self) -> Result<(), ConversationError> {
        let system_count = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        if system_count > 1 {
            return Err(ConversationError::MultipleSystemMessages(system_count));
        }
        if system_count == 1 && self.messages[0].role != Role::System {
            return Err(ConversationError::SystemNotFirst);
        }
        if self.latest_user_index().is_none() {
            return Err(ConversationError::NoUserMessage);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_joins_text_parts_only() {
        let msg = Message::new(
            Role::User,
            vec![
                ContentPart::text("look at"),
                ContentPart::Image { data: "aGVsbG8=".into() },
                ContentPart::text("this"),
            ],
        );
        assert_eq!(msg.text(), "look at this");
    }

    #[test]
    fn content_part_wire_format() {
        let json = serde_json::to_value(ContentPart::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hi"}));

        let audio: ContentPart =
            serde_json::from_str(r#"{"type": "audio", "data": "UklGRg=="}"#).unwrap();
        assert_eq!(audio, ContentPart::Audio { data: "UklGRg==".into() });
    }

    #[test]
    fn validate_accepts_well_formed_conversation() {
        let conv = Conversation::new(vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("how are you?"),
        ]);
        assert!(conv.validate().is_ok());
        assert_eq!(conv.latest_user_index(), Some(3));
    }

    #[test]
    fn validate_rejects_misplaced_system() {
        let conv = Conversation::new(vec![Message::user("hi"), Message::system("late")]);
        assert_eq!(conv.validate(), Err(ConversationError::SystemNotFirst));
    }

    #[test]
    fn validate_rejects_two_systems() {
        let conv = Conversation::new(vec![
            Message::system("a"),
            Message::system("b"),
            Message::user("hi"),
        ]);
        assert_eq!(
            conv.validate(),
            Err(ConversationError::MultipleSystemMessages(2))
        );
    }

    #[test]
    fn validate_requires_user_message() {
        let conv = Conversation::new(vec![Message::system("alone")]);
        assert_eq!(conv.validate(), Err(ConversationError::NoUserMessage));
    }

    #[test]
    fn minimal_keeps_system_and_latest_user() {
        let conv = Conversation::new(vec![
            Message::system("sys"),
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
            Message::assistant("trailing"),
        ]);
        let minimal = conv.minimal();
        assert_eq!(minimal.messages, vec![Message::system("sys"), Message::user("second")]);
    }
}
