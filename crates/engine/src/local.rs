//! Local inference engine — runs GGUF models in the worker process.
//!
//! Uses [Candle](https://github.com/huggingface/candle) to run quantized
//! Llama-architecture models (SmolLM, Qwen2, Llama, Mistral) on the CPU with
//! no server and no network after the first download.
//!
//! `model` can be a preset alias (`smollm:360m`, `qwen:1.5b`, ...) or a path to
//! a `.gguf` file with a `tokenizer.json` next to it. Images and audio are not
//! understood by these models; they reach the prompt as markers only.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use lantern_core::engine::{Generation, GenerationMetadata, InferenceEngine};
use lantern_core::error::EngineError;
use lantern_core::message::Conversation;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::template::ChatTemplate;

// ── Well-known model aliases ───────────────────────────────────────────

/// Friendly aliases that resolve to Hugging Face repos + filenames.
struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
    chat_template: ChatTemplate,
}

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    match alias.to_lowercase().as_str() {
        "smollm" | "smollm:360m" | "smollm-360m" => Some(ModelPreset {
            repo: "HuggingFaceTB/SmolLM2-360M-Instruct-GGUF",
            gguf_file: "smollm2-360m-instruct-q8_0.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM2-360M-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "smollm:1.7b" | "smollm-1.7b" => Some(ModelPreset {
            repo: "HuggingFaceTB/SmolLM2-1.7B-Instruct-GGUF",
            gguf_file: "smollm2-1.7b-instruct-q4_k_m.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM2-1.7B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "qwen:0.5b" | "qwen-0.5b" | "qwen2-0.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-0.5B-Instruct-GGUF",
            gguf_file: "qwen2-0_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-0.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        "qwen:1.5b" | "qwen-1.5b" | "qwen2-1.5b" => Some(ModelPreset {
            repo: "Qwen/Qwen2-1.5B-Instruct-GGUF",
            gguf_file: "qwen2-1_5b-instruct-q4_k_m.gguf",
            tokenizer_repo: "Qwen/Qwen2-1.5B-Instruct",
            chat_template: ChatTemplate::ChatML,
        }),
        _ => None,
    }
}

// ── Local engine ───────────────────────────────────────────────────────

/// Runs a GGUF-quantized model via Candle.
///
/// The model sits behind a mutex because Candle inference is single-threaded
/// CPU work; it is loaded lazily on the first request.
pub struct LocalEngine {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    model_name: String,
    template: ChatTemplate,
}

struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    template: ChatTemplate,
    eos_token_id: u32,
}

impl LocalEngine {
    /// `template` applies to GGUF paths; presets carry their own.
    pub fn new(model_name: &str, template: ChatTemplate) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            model_name: model_name.to_string(),
            template,
        }
    }

    async fn ensure_loaded(&self) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        if state.is_some() {
            return Ok(());
        }
        info!(model = %self.model_name, "Loading local model on first request");
        let name = self.model_name.clone();
        let template = self.template;
        let loaded = tokio::task::spawn_blocking(move || LocalModelState::load(&name, template))
            .await
            .map_err(|e| EngineError::Generation(format!("Model loading task failed: {e}")))??;
        *state = Some(loaded);
        Ok(())
    }
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer, EngineError> {
    Tokenizer::from_file(path)
        .map_err(|e| EngineError::NotConfigured(format!("Failed to load tokenizer: {e}")))
}

fn load_weights(path: &Path, device: &Device) -> Result<qlm::ModelWeights, EngineError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| EngineError::NotConfigured(format!("Failed to open model file: {e}")))?;
    let gguf = gguf_file::Content::read(&mut file)
        .map_err(|e| EngineError::NotConfigured(format!("Failed to parse GGUF file: {e}")))?;
    qlm::ModelWeights::from_gguf(gguf, &mut file, device)
        .map_err(|e| EngineError::NotConfigured(format!("Failed to load model weights: {e}")))
}

fn eos_token(tokenizer: &Tokenizer) -> u32 {
    ["<|im_end|>", "<|eot_id|>", "<end_of_turn>", "<|endoftext|>", "</s>"]
        .iter()
        .find_map(|t| tokenizer.token_to_id(t))
        .unwrap_or(2)
}

impl LocalModelState {
    fn load(model_name: &str, template: ChatTemplate) -> Result<Self, EngineError> {
        let device = Device::Cpu;
        let path = Path::new(model_name);

        let (model_path, tokenizer_path, template) = if path.exists() && model_name.ends_with(".gguf") {
            let tokenizer_path = path.with_file_name("tokenizer.json");
            if !tokenizer_path.exists() {
                return Err(EngineError::NotConfigured(format!(
                    "No tokenizer.json next to {}",
                    path.display()
                )));
            }
            (path.to_path_buf(), tokenizer_path, template)
        } else {
            let preset = resolve_preset(model_name).ok_or_else(|| {
                EngineError::ModelNotFound(format!(
                    "Unknown local model '{model_name}'. Available presets: smollm:360m, \
                     smollm:1.7b, qwen:0.5b, qwen:1.5b. Or provide a path to a .gguf file."
                ))
            })?;

            info!(repo = preset.repo, file = preset.gguf_file, "Downloading/loading local model");

            let api = Api::new().map_err(|e| {
                EngineError::Network(format!("Failed to initialize HuggingFace Hub API: {e}"))
            })?;
            let model_path = api.model(preset.repo.to_string()).get(preset.gguf_file).map_err(|e| {
                EngineError::Network(format!(
                    "Failed to download model '{}' from '{}': {e}",
                    preset.gguf_file, preset.repo
                ))
            })?;
            let tokenizer_path = api
                .model(preset.tokenizer_repo.to_string())
                .get("tokenizer.json")
                .map_err(|e| {
                    EngineError::Network(format!(
                        "Failed to download tokenizer from '{}': {e}",
                        preset.tokenizer_repo
                    ))
                })?;
            (model_path, tokenizer_path, preset.chat_template)
        };

        let tokenizer = load_tokenizer(&tokenizer_path)?;
        let model = load_weights(&model_path, &device)?;
        let eos_token_id = eos_token(&tokenizer);

        info!(path = %model_path.display(), eos_token_id, "Local model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            template,
            eos_token_id,
        })
    }

    /// Tokenize → generate → decode. Returns text, prompt and completion counts.
    fn generate(&mut self, prompt: &str, max_tokens: usize) -> Result<(String, u32, u32), EngineError> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| EngineError::Generation(format!("Tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids();

        debug!(prompt_tokens = prompt_tokens.len(), max_tokens, "Starting local generation");

        let mut logits_processor = LogitsProcessor::new(42, Some(0.7), None);
        let mut generated: Vec<u32> = Vec::new();
        let mut next_input = Tensor::new(prompt_tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let mut position = 0;

        for _ in 0..max_tokens {
            let input_len = next_input.dim(1).map_err(map_candle_err)?;
            let logits = self
                .model
                .forward(&next_input, position)
                .and_then(|l| l.squeeze(0))
                .map_err(map_candle_err)?;
            position += input_len;

            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;
            if next_token == self.eos_token_id {
                break;
            }
            generated.push(next_token);

            next_input = Tensor::new(&[next_token][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        let output = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| EngineError::Generation(format!("Detokenization failed: {e}")))?;

        Ok((output, prompt_tokens.len() as u32, generated.len() as u32))
    }
}

fn map_candle_err(e: candle_core::Error) -> EngineError {
    EngineError::Generation(format!("Candle inference error: {e}"))
}

#[async_trait]
impl InferenceEngine for LocalEngine {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(
        &self,
        conversation: &Conversation,
        max_output_tokens: usize,
    ) -> Result<Generation, EngineError> {
        self.ensure_loaded().await?;

        let started = Instant::now();
        let conversation = conversation.clone();
        let inner = self.inner.clone();

        let (output, template, prompt_tokens, completion_tokens) =
            tokio::task::spawn_blocking(move || {
                let mut guard = inner.blocking_lock();
                let state = guard
                    .as_mut()
                    .ok_or_else(|| EngineError::NotConfigured("Model is not loaded".into()))?;
                let prompt = state.template.render(&conversation);
                let (output, prompt_tokens, completion_tokens) =
                    state.generate(&prompt, max_output_tokens)?;
                Ok::<_, EngineError>((output, state.template, prompt_tokens, completion_tokens))
            })
            .await
            .map_err(|e| EngineError::Generation(format!("Inference task panicked: {e}")))??;

        let mut text = output.trim();
        for marker in template.stop_markers() {
            text = text.trim_end_matches(marker).trim_end();
        }

        Ok(Generation {
            text: text.to_string(),
            metadata: GenerationMetadata {
                engine: Some("local".into()),
                model: Some(self.model_name.clone()),
                prompt_tokens: Some(prompt_tokens),
                completion_tokens: Some(completion_tokens),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        })
    }
}
