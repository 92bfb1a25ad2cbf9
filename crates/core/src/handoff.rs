//! Hand-off schema between the front end and the engine worker process.
//!
//! The front end writes a [`WorkerInput`] as JSON, spawns the worker with the
//! input and output paths, and reads a [`WorkerOutput`] back once the worker
//! exits.

use serde::{Deserialize, Serialize};

use crate::engine::{Generation, GenerationMetadata};
use crate::message::Conversation;

/// What the worker is asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInput {
    /// Unique id of the request this hand-off belongs to.
    pub request_id: String,

    /// The budgeted conversation.
    pub conversation: Conversation,

    /// Output tokens granted by the budget manager.
    pub max_output_tokens: usize,
}

/// What the worker produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutput {
    Success {
        text: String,
        #[serde(default)]
        metadata: GenerationMetadata,
    },
    Failure {
        error: String,
    },
}

impl From<Generation> for WorkerOutput {
    fn from(generation: Generation) -> Self {
        Self::Success {
            text: generation.text,
            metadata: generation.metadata,
        }
    }
}
