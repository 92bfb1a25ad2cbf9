//! Token counters for context budgeting.
//!
//! The front end never loads the model, so counting happens against the
//! engine's chat template rendered locally:
//! - [`HeuristicTokenizer`] — ~4 characters per token, no model files needed.
//! - `HfTokenizer` (feature `local`) — exact counts from a `tokenizer.json`.

use lantern_core::engine::Tokenizer;
use lantern_core::error::TokenizerError;
use lantern_core::message::{ContentPart, Conversation};

use crate::template::ChatTemplate;

/// Tokens charged for each inline image or audio clip on top of its marker.
pub const MEDIA_TOKENS: usize = 256;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

fn media_parts(conversation: &Conversation) -> usize {
    conversation
        .messages
        .iter()
        .flat_map(|m| &m.content)
        .filter(|p| !matches!(p, ContentPart::Text { .. }))
        .count()
}

/// Character-based counter over a rendered chat template.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicTokenizer {
    template: ChatTemplate,
}

impl HeuristicTokenizer {
    pub fn new(template: ChatTemplate) -> Self {
        Self { template }
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(estimate_tokens(text))
    }

    fn count_templated(&self, conversation: &Conversation) -> Result<usize, TokenizerError> {
        let prompt = self.template.render(conversation);
        Ok(estimate_tokens(&prompt) + media_parts(conversation) * MEDIA_TOKENS)
    }
}

/// Exact counter backed by a Hugging Face `tokenizer.json`.
#[cfg(feature = "local")]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    template: ChatTemplate,
}

#[cfg(feature = "local")]
impl HfTokenizer {
    pub fn from_file(
        path: impl AsRef<std::path::Path>,
        template: ChatTemplate,
    ) -> Result<Self, TokenizerError> {
        let inner = tokenizers::Tokenizer::from_file(path.as_ref()).map_err(|e| {
            TokenizerError::Encode(format!(
                "Failed to load tokenizer from {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self { inner, template })
    }

    fn encode_len(&self, text: &str) -> Result<usize, TokenizerError> {
        self.inner
            .encode(text, false)
            .map(|encoding| encoding.get_ids().len())
            .map_err(|e| TokenizerError::Encode(e.to_string()))
    }
}

#[cfg(feature = "local")]
impl Tokenizer for HfTokenizer {
    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        if text.is_empty() {
            return Ok(0);
        }
        self.encode_len(text)
    }

    fn count_templated(&self, conversation: &Conversation) -> Result<usize, TokenizerError> {
        // The rendered prompt already carries the BOS marker.
        let prompt = self.template.render(conversation);
        Ok(self.encode_len(&prompt)? + media_parts(conversation) * MEDIA_TOKENS)
    }
}
