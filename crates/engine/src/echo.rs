//! Echo engine — repeats the latest user message.
//!
//! Needs no model or server, which makes it useful for smoke-testing the
//! worker hand-off end to end.

use std::time::Instant;

use async_trait::async_trait;
use lantern_core::engine::{Generation, GenerationMetadata, InferenceEngine};
use lantern_core::error::EngineError;
use lantern_core::message::Conversation;

use crate::tokenizer::estimate_tokens;

#[derive(Debug, Default)]
pub struct EchoEngine;

#[async_trait]
impl InferenceEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        conversation: &Conversation,
        max_output_tokens: usize,
    ) -> Result<Generation, EngineError> {
        let started = Instant::now();
        let question = conversation
            .latest_user_index()
            .map(|i| conversation.messages[i].text())
            .ok_or_else(|| EngineError::Generation("No user message to echo".into()))?;

        // Respect the budget at roughly four characters per token.
        let text: String = format!("Echo: {question}")
            .chars()
            .take(max_output_tokens.saturating_mul(4))
            .collect();

        let prompt_tokens = conversation
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.text()))
            .sum::<usize>();

        Ok(Generation {
            metadata: GenerationMetadata {
                engine: Some("echo".into()),
                model: None,
                prompt_tokens: Some(prompt_tokens as u32),
                completion_tokens: Some(estimate_tokens(&text) as u32),
                duration_ms: started.elapsed().as_millis() as u64,
            },
            text,
        })
    }
}
