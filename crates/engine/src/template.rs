//! Chat templates — how a conversation is laid out as a single prompt string.
//!
//! Token budgets are measured against the rendered prompt, so the template
//! used for counting must match the one the engine applies.

use lantern_core::message::{ContentPart, Conversation, Message, Role};

/// Marker rendered in place of an inline image.
pub const IMAGE_MARKER: &str = "<image>";
/// Marker rendered in place of inline audio.
pub const AUDIO_MARKER: &str = "<audio>";

/// Chat template format used to structure messages for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|im_start|>system\n{content}<|im_end|>\n<|im_start|>user\n{content}<|im_end|>\n<|im_start|>assistant\n`
    ChatML,
    /// `<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{content}<|eot_id|>`
    Llama3,
    /// `<bos><start_of_turn>user\n{system}\n\n{content}<end_of_turn>\n<start_of_turn>model\n`
    Gemma,
}

impl ChatTemplate {
    /// Parse a template name from configuration.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "chatml" => Some(Self::ChatML),
            "llama3" | "llama-3" => Some(Self::Llama3),
            "gemma" | "gemma3" | "gemma3n" => Some(Self::Gemma),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatML => "chatml",
            Self::Llama3 => "llama3",
            Self::Gemma => "gemma",
        }
    }

    /// Render the whole conversation, ending with the assistant turn opener.
    pub fn render(&self, conversation: &Conversation) -> String {
        match self {
            Self::ChatML => format_chatml(&conversation.messages),
            Self::Llama3 => format_llama3(&conversation.messages),
            Self::Gemma => format_gemma(&conversation.messages),
        }
    }

    /// End-of-turn markers the engine may leave on its output.
    pub fn stop_markers(&self) -> &'static [&'static str] {
        match self {
            Self::ChatML => &["<|im_end|>", "<|endoftext|>"],
            Self::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
            Self::Gemma => &["<end_of_turn>", "<eos>"],
        }
    }
}

/// Message content with media replaced by markers, parts joined by a space.
fn render_content(message: &Message) -> String {
    message
        .content
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => text.as_str(),
            ContentPart::Image { .. } => IMAGE_MARKER,
            ContentPart::Audio { .. } => AUDIO_MARKER,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&render_content(msg));
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_llama3(messages: &[Message]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(msg.role.as_str());
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(&render_content(msg));
        prompt.push_str("<|eot_id|>");
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

/// Gemma has no system role: the system prompt is folded into the first
/// user turn.
fn format_gemma(messages: &[Message]) -> String {
    let mut prompt = String::from("<bos>");
    let mut pending_system: Option<String> = None;

    for msg in messages {
        match msg.role {
            Role::System => {
                pending_system = Some(render_content(msg));
            }
            Role::User => {
                prompt.push_str("<start_of_turn>user\n");
                if let Some(system) = pending_system.take() {
                    prompt.push_str(&system);
                    prompt.push_str("\n\n");
                }
                prompt.push_str(&render_content(msg));
                prompt.push_str("<end_of_turn>\n");
            }
            Role::Assistant => {
                prompt.push_str("<start_of_turn>model\n");
                prompt.push_str(&render_content(msg));
                prompt.push_str("<end_of_turn>\n");
            }
        }
    }
    prompt.push_str("<start_of_turn>model\n");
    prompt
}
