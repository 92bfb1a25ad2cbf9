//! OpenAI-compatible engine implementation.
//!
//! Works with any server exposing `/v1/chat/completions`: Ollama, vLLM,
//! llama.cpp's server, LM Studio, OpenAI itself.
//!
//! Multimodal parts are sent as OpenAI content arrays: images as
//! `image_url` data URLs, audio as `input_audio`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use lantern_core::engine::{Generation, GenerationMetadata, InferenceEngine};
use lantern_core::error::EngineError;
use lantern_core::message::{ContentPart, Conversation, Message};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An engine that delegates generation to an OpenAI-compatible server.
pub struct OpenAiCompatEngine {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatEngine {
    /// Create a new engine. A `timeout` of `None` waits indefinitely.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, EngineError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| EngineError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            client,
        })
    }

    /// Convert our messages to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let text_only = m.content.iter().all(|p| p.as_text().is_some());
                let content = if text_only {
                    ApiContent::Text(m.text())
                } else {
                    ApiContent::Parts(m.content.iter().map(ApiContentPart::from).collect())
                };
                ApiMessage {
                    role: m.role.as_str().to_string(),
                    content,
                }
            })
            .collect()
    }

    fn parse_response(
        api_response: ApiResponse,
        model: &str,
        started: Instant,
    ) -> Result<Generation, EngineError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Api {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        Ok(Generation {
            text: choice.message.content.unwrap_or_default().trim().to_string(),
            metadata: GenerationMetadata {
                engine: Some("openai_compat".into()),
                model: Some(api_response.model.unwrap_or_else(|| model.to_string())),
                prompt_tokens: api_response.usage.as_ref().map(|u| u.prompt_tokens),
                completion_tokens: api_response.usage.as_ref().map(|u| u.completion_tokens),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        })
    }
}

#[async_trait]
impl InferenceEngine for OpenAiCompatEngine {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn generate(
        &self,
        conversation: &Conversation,
        max_output_tokens: usize,
    ) -> Result<Generation, EngineError> {
        let url = format!("{}/chat/completions", self.base_url);
        let started = Instant::now();

        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&conversation.messages),
            "max_tokens": max_output_tokens,
            "stream": false,
        });

        debug!(
            model = %self.model,
            messages = conversation.len(),
            max_output_tokens,
            "Sending completion request"
        );

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 404 {
            return Err(EngineError::ModelNotFound(self.model.clone()));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Engine server returned error");
            return Err(EngineError::Api {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| EngineError::Api {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        Self::parse_response(api_response, &self.model, started)
    }
}

// ── OpenAI API types ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
    InputAudio { input_audio: ApiInputAudio },
}

#[derive(Debug, Serialize)]
struct ApiImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ApiInputAudio {
    data: String,
    format: String,
}

impl From<&ContentPart> for ApiContentPart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => Self::Text { text: text.clone() },
            ContentPart::Image { data } => Self::ImageUrl {
                image_url: ApiImageUrl {
                    url: if data.starts_with("data:") {
                        data.clone()
                    } else {
                        format!("data:image/png;base64,{data}")
                    },
                },
            },
            ContentPart::Audio { data } => Self::InputAudio {
                input_audio: ApiInputAudio {
                    data: data.clone(),
                    format: "wav".into(),
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
