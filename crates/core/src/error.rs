//! Error types for the Lantern domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for Lantern domain operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Engine errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Tokenizer errors ---
    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Engine request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Engine not configured: {0}")]
    NotConfigured(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum TokenizerError {
    /// The chat template could not be applied to the conversation.
    #[error("Chat template failed: {0}")]
    Template(String),

    #[error("Encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Chat not found: {0}")]
    NotFound(String),

    #[error("Failed to encode chat records: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_displays_correctly() {
        let err = Error::Engine(EngineError::Api {
            status_code: 503,
            message: "model loading".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("model loading"));
    }

    #[test]
    fn tokenizer_error_displays_correctly() {
        let err = Error::Tokenizer(TokenizerError::Template("unsupported role".into()));
        assert!(err.to_string().contains("Chat template failed"));
        assert!(err.to_string().contains("unsupported role"));
    }
}
