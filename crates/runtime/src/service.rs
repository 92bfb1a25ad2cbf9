//! Chat orchestration: history → budget → worker → store.

use std::sync::Arc;

use lantern_config::ChatConfig;
use lantern_context::{
    ContextBudgetManager, TokenBudgetReport, assemble_conversation, normalize_system_prompt,
};
use lantern_core::engine::GenerationMetadata;
use lantern_core::message::{ContentPart, Message, Role};
use lantern_core::store::{ChatId, ConversationStore, Turn};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ChatError;
use crate::scheduler::{Scheduler, SubmitOutcome};

/// What the user just sent.
#[derive(Debug, Clone, Default)]
pub struct NewUserMessage {
    pub text: String,
    /// Inline images and audio, placed before the text.
    pub attachments: Vec<ContentPart>,
}

impl NewUserMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }

    pub fn has_image(&self) -> bool {
        self.attachments
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. }))
    }

    /// The first image attachment, if any.
    pub fn image_data(&self) -> Option<&str> {
        self.attachments.iter().find_map(|p| match p {
            ContentPart::Image { data } => Some(data.as_str()),
            _ => None,
        })
    }

    fn to_message(&self) -> Message {
        let mut content = self.attachments.clone();
        if !self.text.is_empty() {
            content.push(ContentPart::text(&self.text));
        }
        Message::new(Role::User, content)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Continue this chat; a fresh one is created when absent or unknown.
    pub chat_id: Option<ChatId>,
    pub message: NewUserMessage,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub chat_id: ChatId,
    /// The chat's turns after this one was appended.
    pub conversation: Vec<Turn>,
    pub metadata: GenerationMetadata,
    pub budget: BudgetSummary,
}

/// How the request was fitted into the context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub input: TokenBudgetReport,
    pub output_tokens: usize,
    pub dropped_messages: usize,
    pub minimal_fallback: bool,
}

#[derive(Debug, Clone)]
pub enum ChatOutcome {
    Reply(ChatReply),
    /// Cancelled or superseded; nothing was stored.
    Stopped,
}

pub struct ChatService {
    scheduler: Arc<Scheduler>,
    budget: ContextBudgetManager,
    store: Arc<dyn ConversationStore>,
    chat: ChatConfig,
    desired_output_tokens: usize,
}

impl ChatService {
    pub fn new(
        scheduler: Arc<Scheduler>,
        budget: ContextBudgetManager,
        store: Arc<dyn ConversationStore>,
        chat: ChatConfig,
        desired_output_tokens: usize,
    ) -> Self {
        Self {
            scheduler,
            budget,
            store,
            chat,
            desired_output_tokens,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Answer one message. The turn is stored only if the worker completes.
    pub async fn submit_chat(&self, request: ChatRequest) -> Result<ChatOutcome, ChatError> {
        if request.message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let history = match &request.chat_id {
            Some(id) => self
                .store
                .lookup(id)
                .await?
                .map(|record| record.conversation)
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let system_prompt = normalize_system_prompt(
            request.system_prompt.as_deref(),
            &self.chat.default_system_prompt,
            self.chat.max_system_prompt_chars,
        );
        let conversation =
            assemble_conversation(system_prompt, &history, request.message.to_message());

        let budgeted = self
            .budget
            .optimize_for_context(conversation, self.desired_output_tokens)?;
        let budget = BudgetSummary {
            input: budgeted.report,
            output_tokens: budgeted.output_tokens,
            dropped_messages: budgeted.dropped_messages,
            minimal_fallback: budgeted.minimal_fallback,
        };

        let generation = match self
            .scheduler
            .submit(budgeted.conversation, budgeted.output_tokens)
            .await?
        {
            SubmitOutcome::Completed(generation) => generation,
            SubmitOutcome::Stopped => return Ok(ChatOutcome::Stopped),
        };

        let chat_id = request.chat_id.unwrap_or_default();
        let image = request.message.image_data().map(str::to_string);
        let mut turn = Turn::new(request.message.text, generation.text.clone());
        if let Some(data) = image {
            turn = turn.with_image(data);
        }
        let record = self.store.append_turn(&chat_id, turn).await?;

        info!(
            chat_id = %chat_id,
            turns = record.conversation.len(),
            duration_ms = generation.metadata.duration_ms,
            "Chat turn stored"
        );

        Ok(ChatOutcome::Reply(ChatReply {
            reply: generation.text,
            chat_id,
            conversation: record.conversation,
            metadata: generation.metadata,
            budget,
        }))
    }

    /// Stop whatever is generating. Returns whether anything was running.
    pub async fn cancel_current(&self) -> bool {
        self.scheduler.cancel().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachments_precede_text() {
        let message = NewUserMessage {
            text: "what is this?".into(),
            attachments: vec![ContentPart::Image {
                data: "aGk=".into(),
            }],
        };
        let built = message.to_message();
        assert_eq!(built.role, Role::User);
        assert!(matches!(built.content[0], ContentPart::Image { .. }));
        assert_eq!(built.content[1].as_text(), Some("what is this?"));
        assert!(message.has_image());
        assert_eq!(message.image_data(), Some("aGk="));
    }

    #[test]
    fn blank_message_is_empty() {
        assert!(NewUserMessage::text("  ").is_empty());
        assert!(!NewUserMessage::text("hi").is_empty());
        let audio_only = NewUserMessage {
            text: String::new(),
            attachments: vec![ContentPart::Audio {
                data: "UklGRg==".into(),
            }],
        };
        assert!(!audio_only.is_empty());
        assert!(!audio_only.has_image());
    }
}
