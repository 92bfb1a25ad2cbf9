//! Context-window management for the generation engine.
//!
//! The engine accepts a fixed number of tokens per call, shared between the
//! conversation and the reply. This crate decides how much history to keep
//! and how many tokens to reserve for output.
//!
//! # Pipeline
//!
//! | Step | Module | Outcome |
//! |------|--------|---------|
//! | 1. Assemble | [`assemble`] | system prompt + stored turns + new message |
//! | 2. Count | [`report`] | exact templated total and per-role breakdown |
//! | 3. Budget | [`budget`] | trimmed conversation and granted output tokens |

pub mod assemble;
pub mod budget;
pub mod report;

pub use assemble::{assemble_conversation, history_messages, normalize_system_prompt};
pub use budget::{BudgetError, BudgetedConversation, ContextBudgetManager, ContextLimits};
pub use report::TokenBudgetReport;
