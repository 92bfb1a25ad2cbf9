//! Engine traits — the abstraction over the text-generation backend.
//!
//! An [`InferenceEngine`] turns a conversation plus an output-token budget into
//! generated text. It runs inside the isolated worker process; the front end
//! never calls it directly.
//!
//! A [`Tokenizer`] exposes the engine's own counting so the front end can size
//! the conversation exactly before handing it off.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, TokenizerError};
use crate::message::Conversation;

/// Text produced by one engine call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,

    #[serde(default)]
    pub metadata: GenerationMetadata,
}

/// Performance information reported alongside a generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Engine that produced the text (e.g. "openai_compat", "local")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,

    /// Wall-clock generation time
    #[serde(default)]
    pub duration_ms: u64,
}

/// A text-generation backend.
///
/// Cancellation is not part of this contract: the only way to stop a
/// generation is to terminate the process running it.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Short engine identifier used in logs and metadata.
    fn name(&self) -> &str;

    /// Generate a reply to `conversation`, producing at most
    /// `max_output_tokens` tokens.
    async fn generate(
        &self,
        conversation: &Conversation,
        max_output_tokens: usize,
    ) -> Result<Generation, EngineError>;
}

/// The engine's tokenizer and chat template, used for exact budgeting.
pub trait Tokenizer: Send + Sync {
    /// Number of tokens in `text`, without special tokens.
    fn count(&self, text: &str) -> Result<usize, TokenizerError>;

    /// Number of tokens the engine will see for the whole conversation after
    /// the chat template (including the generation prompt) is applied.
    fn count_templated(&self, conversation: &Conversation) -> Result<usize, TokenizerError>;
}
