//! # Lantern Core
//!
//! Domain types, traits, and error definitions for Lantern, a local front end
//! that admits chat requests into a single long-running text-generation engine.
//! This crate has **zero framework dependencies** — it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here. Implementations live in their
//! respective crates:
//! - [`InferenceEngine`] and [`Tokenizer`] — implemented by `lantern-engine`
//! - [`ConversationStore`] — implemented by `lantern-store`
//!
//! The hand-off schema in [`handoff`] is the only contract shared across the
//! process boundary between the front end and the engine worker.

pub mod engine;
pub mod error;
pub mod handoff;
pub mod message;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use engine::{Generation, GenerationMetadata, InferenceEngine, Tokenizer};
pub use error::{Error, Result};
pub use handoff::{WorkerInput, WorkerOutput};
pub use message::{ContentPart, Conversation, Message, Role};
pub use store::{ChatId, ChatRecord, ConversationStore, Turn};
