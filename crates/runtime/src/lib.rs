//! Request admission and worker lifecycle for Lantern.
//!
//! The engine is expensive and runs in its own process. This crate makes sure
//! at most one such process exists at a time:
//!
//! - [`process`] — spawning, monitoring and terminating a worker
//! - [`handoff`] — per-request JSON files passed to and from the worker
//! - [`scheduler`] — single-flight admission with preemption and cancel
//! - [`service`] — the caller-facing chat operation tying it all together

pub mod error;
pub mod handoff;
pub mod process;
pub mod scheduler;
pub mod service;

pub use error::{ChatError, WorkerError};
pub use handoff::HandoffFiles;
pub use process::{WorkerCommand, WorkerExit, WorkerHandle};
pub use scheduler::{Scheduler, SubmitOutcome};
pub use service::{BudgetSummary, ChatOutcome, ChatReply, ChatRequest, ChatService, NewUserMessage};
