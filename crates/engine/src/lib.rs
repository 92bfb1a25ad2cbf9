//! Engine implementations for Lantern.
//!
//! All engines implement `lantern_core::InferenceEngine` and run inside the
//! worker process. The front end only uses the tokenizers here, to size
//! conversations before handing them off.

pub mod echo;
#[cfg(feature = "local")]
pub mod local;
pub mod openai_compat;
pub mod runner;
pub mod template;
pub mod tokenizer;

use std::sync::Arc;
use std::time::Duration;

use lantern_config::EngineConfig;
use lantern_core::engine::{InferenceEngine, Tokenizer};
use lantern_core::error::EngineError;

pub use echo::EchoEngine;
#[cfg(feature = "local")]
pub use local::LocalEngine;
pub use openai_compat::OpenAiCompatEngine;
pub use runner::{report_failure, run_handoff};
pub use template::ChatTemplate;
#[cfg(feature = "local")]
pub use tokenizer::HfTokenizer;
pub use tokenizer::HeuristicTokenizer;

fn chat_template(config: &EngineConfig) -> Result<ChatTemplate, EngineError> {
    ChatTemplate::parse(&config.chat_template).ok_or_else(|| {
        EngineError::NotConfigured(format!(
            "Unknown chat template '{}'. Use chatml, llama3 or gemma.",
            config.chat_template
        ))
    })
}

/// Build the engine selected by `config.kind`.
pub fn build_engine(config: &EngineConfig) -> Result<Box<dyn InferenceEngine>, EngineError> {
    match config.kind.as_str() {
        "openai_compat" => {
            let timeout = (config.request_timeout_secs > 0)
                .then(|| Duration::from_secs(config.request_timeout_secs));
            Ok(Box::new(OpenAiCompatEngine::new(
                &config.api_url,
                &config.model,
                config.api_key.clone(),
                timeout,
            )?))
        }
        "echo" => Ok(Box::new(EchoEngine)),
        #[cfg(feature = "local")]
        "local" => Ok(Box::new(LocalEngine::new(&config.model, chat_template(config)?))),
        #[cfg(not(feature = "local"))]
        "local" => Err(EngineError::NotConfigured(
            "Local inference requires building with the `local` feature".into(),
        )),
        other => Err(EngineError::NotConfigured(format!("Unknown engine kind '{other}'"))),
    }
}

/// Build the token counter the front end budgets with.
///
/// Exact when `tokenizer_path` is set and the `local` feature is enabled,
/// heuristic otherwise.
pub fn build_tokenizer(config: &EngineConfig) -> Result<Arc<dyn Tokenizer>, EngineError> {
    let template = chat_template(config)?;
    if let Some(exact) = exact_tokenizer(config, template)? {
        return Ok(exact);
    }
    Ok(Arc::new(HeuristicTokenizer::new(template)))
}

#[cfg(feature = "local")]
fn exact_tokenizer(
    config: &EngineConfig,
    template: ChatTemplate,
) -> Result<Option<Arc<dyn Tokenizer>>, EngineError> {
    let Some(path) = &config.tokenizer_path else {
        return Ok(None);
    };
    let tokenizer = HfTokenizer::from_file(path, template)
        .map_err(|e| EngineError::NotConfigured(e.to_string()))?;
    Ok(Some(Arc::new(tokenizer)))
}

#[cfg(not(feature = "local"))]
fn exact_tokenizer(
    config: &EngineConfig,
    _template: ChatTemplate,
) -> Result<Option<Arc<dyn Tokenizer>>, EngineError> {
    if config.tokenizer_path.is_some() {
        tracing::warn!("engine.tokenizer_path needs the `local` feature, falling back to estimated counts");
    }
    Ok(None)
}
