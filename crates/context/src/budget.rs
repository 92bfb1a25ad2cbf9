//! Context budget manager — fits a conversation into the engine's window.
//!
//! # Algorithm
//!
//! 1. Count the conversation exactly (templated) and compute
//!    `available = EFFECTIVE_CONTEXT - total`.
//! 2. If the desired output fits, hand the conversation back untouched.
//! 3. If the input alone fills the window, trim history and grant whatever is
//!    left, but never less than the output floor.
//! 4. Otherwise the input fits but the desired output does not: shrink the
//!    output grant, again never below the floor.
//!
//! The floor can push input + output past the window when the anchor messages
//! are huge. That overrun is logged, not rejected.
//!
//! # Trimming
//!
//! The system message and the latest user message are anchors and always
//! survive. Earlier user messages (newest first) and then assistant messages
//! (newest first) are re-admitted one at a time until the first one that does
//! not fit; nothing after that is considered. This keeps a contiguous recent
//! window rather than packing the budget optimally, so a large message can
//! leave unused room behind it.

use std::sync::Arc;

use lantern_config::ContextConfig;
use lantern_core::engine::Tokenizer;
use lantern_core::error::TokenizerError;
use lantern_core::message::{Conversation, ConversationError, Role};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::report::TokenBudgetReport;

/// Errors from budgeting a conversation.
#[derive(Debug, Clone, Error)]
pub enum BudgetError {
    /// The tokenizer failed, including on the minimal fallback conversation.
    #[error("Tokenization failed: {0}")]
    Tokenization(#[from] TokenizerError),

    #[error("Invalid conversation: {0}")]
    InvalidConversation(#[from] ConversationError),
}

/// Window sizes the manager works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    /// The engine's fixed context window.
    pub max_context: usize,
    /// Reserved for control tokens and padding.
    pub safety_buffer: usize,
    /// Output is never granted fewer tokens than this.
    pub min_output: usize,
}

impl ContextLimits {
    /// `max_context - safety_buffer`
    pub fn effective(&self) -> usize {
        self.max_context.saturating_sub(self.safety_buffer)
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_context: 32_000,
            safety_buffer: 100,
            min_output: 512,
        }
    }
}

impl From<&ContextConfig> for ContextLimits {
    fn from(config: &ContextConfig) -> Self {
        Self {
            max_context: config.max_context_tokens,
            safety_buffer: config.safety_buffer,
            min_output: config.min_output_tokens,
        }
    }
}

/// A conversation sized for the engine, with its output grant.
#[derive(Debug, Clone)]
pub struct BudgetedConversation {
    pub conversation: Conversation,
    /// Output tokens granted to the engine.
    pub output_tokens: usize,
    /// Counts for `conversation` as returned.
    pub report: TokenBudgetReport,
    /// Messages removed from the original conversation.
    pub dropped_messages: usize,
    /// Set when counting the full conversation failed and only the system
    /// prompt and latest user message were kept.
    pub minimal_fallback: bool,
    /// Tokens by which input + output exceed the effective window (normally 0).
    pub overrun: usize,
}

/// Counts tokens with the engine's tokenizer and sizes conversations to fit.
pub struct ContextBudgetManager {
    tokenizer: Arc<dyn Tokenizer>,
    limits: ContextLimits,
}

impl ContextBudgetManager {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, limits: ContextLimits) -> Self {
        Self { tokenizer, limits }
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    pub fn effective_context(&self) -> usize {
        self.limits.effective()
    }

    /// Exact token count of `text`. Empty text is 0 tokens.
    pub fn count_tokens(&self, text: &str) -> Result<usize, BudgetError> {
        if text.is_empty() {
            return Ok(0);
        }
        Ok(self.tokenizer.count(text)?)
    }

    /// Exact templated total plus a per-role breakdown.
    pub fn count_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<TokenBudgetReport, BudgetError> {
        let total = self.tokenizer.count_templated(conversation)?;
        let per_message = conversation
            .messages
            .iter()
            .map(|m| Ok((m.role, self.count_tokens(&m.text())?)))
            .collect::<Result<Vec<_>, BudgetError>>()?;
        Ok(TokenBudgetReport::from_counts(total, per_message))
    }

    /// Fit `conversation` into the window and decide the output grant.
    ///
    /// If the tokenizer fails on the full conversation, the system prompt and
    /// latest user message are budgeted on their own instead. If that fails
    /// too, the tokenizer error is returned.
    pub fn optimize_for_context(
        &self,
        conversation: Conversation,
        desired_output: usize,
    ) -> Result<BudgetedConversation, BudgetError> {
        conversation.validate()?;

        match self.plan(&conversation, desired_output) {
            Err(BudgetError::Tokenization(err)) => {
                warn!(
                    error = %err,
                    messages = conversation.len(),
                    "Token counting failed, retrying with system prompt and latest user message"
                );
                let minimal = conversation.minimal();
                let mut planned = self.plan(&minimal, desired_output)?;
                planned.minimal_fallback = true;
                planned.dropped_messages = conversation.len() - planned.conversation.len();
                Ok(planned)
            }
            other => other,
        }
    }

    fn plan(
        &self,
        conversation: &Conversation,
        desired_output: usize,
    ) -> Result<BudgetedConversation, BudgetError> {
        let effective = self.limits.effective();
        let report = self.count_conversation(conversation)?;
        let current = report.total;

        if current < effective && effective - current >= desired_output {
            debug!(input = current, output = desired_output, "Conversation fits");
            return Ok(self.finish(conversation.clone(), report, desired_output, 0));
        }

        if current >= effective {
            warn!(
                input = current,
                effective, "Input fills the context window, trimming conversation"
            );
            let trimmed = self.trim(conversation, desired_output)?;
            let trimmed_report = self.count_conversation(&trimmed)?;
            let output = effective
                .saturating_sub(trimmed_report.total)
                .max(self.limits.min_output);
            let dropped = conversation.len() - trimmed.len();
            return Ok(self.finish(trimmed, trimmed_report, output, dropped));
        }

        let output = (effective - current).max(self.limits.min_output);
        info!(
            desired = desired_output,
            granted = output,
            "Reduced output tokens to fit context window"
        );
        Ok(self.finish(conversation.clone(), report, output, 0))
    }

    fn finish(
        &self,
        conversation: Conversation,
        report: TokenBudgetReport,
        output_tokens: usize,
        dropped_messages: usize,
    ) -> BudgetedConversation {
        let overrun = (report.total + output_tokens).saturating_sub(self.limits.effective());
        if overrun > 0 {
            warn!(
                input = report.total,
                output = output_tokens,
                overrun,
                "Output floor exceeds the remaining context window"
            );
        }
        info!(
            input = report.total,
            output = output_tokens,
            system = report.system,
            user = report.user,
            assistant = report.assistant,
            template = report.template_overhead,
            "Token budget"
        );
        BudgetedConversation {
            conversation,
            output_tokens,
            report,
            dropped_messages,
            minimal_fallback: false,
            overrun,
        }
    }

    /// Keep the anchors and as much recent history as fits in
    /// `EFFECTIVE_CONTEXT - min_output_tokens` input tokens.
    pub fn trim(
        &self,
        conversation: &Conversation,
        min_output_tokens: usize,
    ) -> Result<Conversation, BudgetError> {
        let target = self.limits.effective().saturating_sub(min_output_tokens);
        let messages = &conversation.messages;
        let latest_user = conversation
            .latest_user_index()
            .ok_or(ConversationError::NoUserMessage)?;
        let system = messages.iter().position(|m| m.role == Role::System);

        let mut kept: Vec<usize> = system.into_iter().chain([latest_user]).collect();

        let earlier_users = (0..latest_user).rev().filter(|&i| messages[i].role == Role::User);
        let assistants = (0..messages.len())
            .rev()
            .filter(|&i| messages[i].role == Role::Assistant);

        for idx in earlier_users.chain(assistants) {
            let mut tentative = kept.clone();
            tentative.push(idx);
            let tokens = self
                .tokenizer
                .count_templated(&select(conversation, &tentative))?;
            if tokens > target {
                debug!(index = idx, tokens, target, "History window closed");
                break;
            }
            kept = tentative;
        }

        let trimmed = select(conversation, &kept);
        info!(
            from = messages.len(),
            to = trimmed.len(),
            target,
            "Trimmed conversation"
        );
        Ok(trimmed)
    }
}

/// The messages at `indices` in chronological order, system message first.
fn select(conversation: &Conversation, indices: &[usize]) -> Conversation {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    let (system, rest): (Vec<usize>, Vec<usize>) = sorted
        .into_iter()
        .partition(|&i| conversation.messages[i].role == Role::System);
    Conversation::new(
        system
            .into_iter()
            .chain(rest)
            .map(|i| conversation.messages[i].clone())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_core::message::Message;

    /// One token per whitespace-separated word, plus a fixed cost per message
    /// when templated.
    struct WordTokenizer {
        per_message_overhead: usize,
    }

    impl Tokenizer for WordTokenizer {
        fn count(&self, text: &str) -> Result<usize, TokenizerError> {
            Ok(text.split_whitespace().count())
        }

        fn count_templated(&self, conversation: &Conversation) -> Result<usize, TokenizerError> {
            Ok(conversation
                .messages
                .iter()
                .map(|m| m.text().split_whitespace().count() + self.per_message_overhead)
                .sum())
        }
    }

    /// Fails to template any conversation longer than `max_messages`.
    struct FragileTokenizer {
        max_messages: usize,
    }

    impl Tokenizer for FragileTokenizer {
        fn count(&self, text: &str) -> Result<usize, TokenizerError> {
            Ok(text.split_whitespace().count())
        }

        fn count_templated(&self, conversation: &Conversation) -> Result<usize, TokenizerError> {
            if conversation.len() > self.max_messages {
                return Err(TokenizerError::Template("sequence too long".into()));
            }
            Ok(conversation.messages.iter().map(|m| m.text().split_whitespace().count()).sum())
        }
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    fn manager(max_context: usize, overhead: usize) -> ContextBudgetManager {
        ContextBudgetManager::new(
            Arc::new(WordTokenizer {
                per_message_overhead: overhead,
            }),
            ContextLimits {
                max_context,
                safety_buffer: 100,
                min_output: 512,
            },
        )
    }

    /// System (50 tokens), five prior turns of 100 + 100 tokens, then a
    /// 20-token question.
    fn long_history() -> Conversation {
        let mut conv = Conversation::new(vec![Message::system(words(50))]);
        for i in 0..5 {
            conv.push(Message::user(format!("u{i} {}", words(99))));
            conv.push(Message::assistant(format!("a{i} {}", words(99))));
        }
        conv.push(Message::user(words(20)));
        conv
    }

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(manager(1100, 0).count_tokens("").unwrap(), 0);
    }

    #[test]
    fn report_breaks_down_roles_and_overhead() {
        let conv = Conversation::new(vec![
            Message::system(words(10)),
            Message::user(words(5)),
            Message::assistant(words(7)),
            Message::user(words(3)),
        ]);
        let report = manager(1100, 4).count_conversation(&conv).unwrap();
        assert_eq!(report.total, 25 + 16);
        assert_eq!(report.system, 10);
        assert_eq!(report.user, 8);
        assert_eq!(report.assistant, 7);
        assert_eq!(report.template_overhead, 16);
    }

    #[test]
    fn fitting_conversation_is_untouched() {
        let conv = Conversation::new(vec![Message::system(words(50)), Message::user(words(50))]);
        let budgeted = manager(1100, 0).optimize_for_context(conv.clone(), 512).unwrap();

        assert_eq!(budgeted.conversation, conv);
        assert_eq!(budgeted.output_tokens, 512);
        assert_eq!(budgeted.dropped_messages, 0);
        assert_eq!(budgeted.overrun, 0);
    }

    #[test]
    fn oversized_output_request_is_reduced_not_trimmed() {
        // effective 1000, input 300 → 700 available of the 900 desired
        let conv = Conversation::new(vec![Message::system(words(100)), Message::user(words(200))]);
        let budgeted = manager(1100, 0).optimize_for_context(conv.clone(), 900).unwrap();

        assert_eq!(budgeted.conversation, conv);
        assert_eq!(budgeted.output_tokens, 700);
    }

    #[test]
    fn grant_equals_min_of_desired_and_remaining_when_input_is_small() {
        let mgr = manager(1100, 0);
        for (input, desired) in [(100, 512), (400, 512), (488, 512), (300, 600), (200, 2000)] {
            let conv = Conversation::new(vec![Message::user(words(input))]);
            let budgeted = mgr.optimize_for_context(conv.clone(), desired).unwrap();
            assert_eq!(budgeted.conversation, conv);
            assert_eq!(budgeted.output_tokens, desired.min(1000 - input));
        }
    }

    #[test]
    fn floor_applies_when_little_room_remains() {
        // effective 1000, input 900 → only 100 left, floor lifts it to 512
        let conv = Conversation::new(vec![Message::user(words(900))]);
        let budgeted = manager(1100, 0).optimize_for_context(conv, 2000).unwrap();

        assert_eq!(budgeted.output_tokens, 512);
        assert_eq!(budgeted.overrun, 412);
    }

    #[test]
    fn trim_admits_recent_history_until_first_rejection() {
        let mgr = manager(1100, 0);
        let conv = long_history();
        assert!(mgr.count_conversation(&conv).unwrap().total >= mgr.effective_context());

        let budgeted = mgr.optimize_for_context(conv.clone(), 512).unwrap();

        // Anchors (70) + u4, u3, u2, u1 (400) = 470 <= 488; u0 would make 570.
        let expected: Vec<Message> = [0, 3, 5, 7, 9, 11]
            .iter()
            .map(|&i| conv.messages[i].clone())
            .collect();
        assert_eq!(budgeted.conversation.messages, expected);
        assert_eq!(budgeted.conversation.messages[0].role, Role::System);
        assert_eq!(budgeted.conversation.messages[5], conv.messages[11]);
        assert_eq!(budgeted.report.total, 470);
        assert_eq!(budgeted.output_tokens, 530);
        assert_eq!(budgeted.dropped_messages, 6);
    }

    #[test]
    fn trim_is_deterministic() {
        let mgr = manager(1100, 0);
        let first = mgr.optimize_for_context(long_history(), 512).unwrap();
        let second = mgr.optimize_for_context(long_history(), 512).unwrap();
        assert_eq!(first.conversation, second.conversation);
        assert_eq!(first.output_tokens, second.output_tokens);
    }

    #[test]
    fn trim_does_not_skip_past_a_large_message() {
        let mgr = manager(1100, 0);
        let conv = Conversation::new(vec![
            Message::system(words(10)),
            Message::user(words(5)),      // would fit
            Message::assistant(words(5)), // would fit
            Message::user(words(900)),    // too big
            Message::assistant(words(5)),
            Message::user(words(1000)), // latest, forces trimming
        ]);
        let trimmed = mgr.trim(&conv, 0).unwrap();
        // 10 + 1000 already exceeds the target, so nothing else is admitted
        assert_eq!(trimmed.messages, vec![conv.messages[0].clone(), conv.messages[5].clone()]);

        let small_latest = Conversation::new(vec![
            Message::system(words(10)),
            Message::user(words(5)),
            Message::assistant(words(5)),
            Message::user(words(900)),
            Message::assistant(words(5)),
            Message::user(words(20)),
        ]);
        // target 1000 - 512 = 488: the 900-token user message is rejected
        // first, so the small earlier user message is never tried; assistants
        // are considered only after all earlier users, and never reached.
        let trimmed = mgr.trim(&small_latest, 512).unwrap();
        assert_eq!(
            trimmed.messages,
            vec![small_latest.messages[0].clone(), small_latest.messages[5].clone()]
        );
    }

    #[test]
    fn trim_orders_messages_chronologically_with_system_first() {
        let mgr = manager(1100, 0);
        let conv = Conversation::new(vec![
            Message::system(words(10)),
            Message::user(words(10)),
            Message::assistant(words(10)),
            Message::user(words(10)),
            Message::assistant(words(10)),
            Message::user(words(10)),
        ]);
        let trimmed = mgr.trim(&conv, 512).unwrap();
        assert_eq!(trimmed, conv);
    }

    #[test]
    fn output_never_below_floor_after_trimming() {
        let mgr = manager(1100, 0);
        let conv = Conversation::new(vec![
            Message::system(words(600)),
            Message::assistant(words(300)),
            Message::user(words(600)),
        ]);
        let budgeted = mgr.optimize_for_context(conv, 512).unwrap();
        assert_eq!(budgeted.conversation.len(), 2);
        assert_eq!(budgeted.output_tokens, 512);
        assert!(budgeted.overrun > 0);
    }

    #[test]
    fn tokenizer_failure_falls_back_to_minimal_conversation() {
        let mgr = ContextBudgetManager::new(
            Arc::new(FragileTokenizer { max_messages: 2 }),
            ContextLimits {
                max_context: 1100,
                safety_buffer: 100,
                min_output: 512,
            },
        );
        let conv = Conversation::new(vec![
            Message::system(words(10)),
            Message::user(words(10)),
            Message::assistant(words(10)),
            Message::user(words(10)),
        ]);
        let budgeted = mgr.optimize_for_context(conv.clone(), 512).unwrap();

        assert!(budgeted.minimal_fallback);
        assert_eq!(budgeted.dropped_messages, 2);
        assert_eq!(
            budgeted.conversation.messages,
            vec![conv.messages[0].clone(), conv.messages[3].clone()]
        );
        assert_eq!(budgeted.output_tokens, 512);
    }

    #[test]
    fn tokenizer_failure_on_minimal_conversation_is_fatal() {
        let mgr = ContextBudgetManager::new(
            Arc::new(FragileTokenizer { max_messages: 0 }),
            ContextLimits::default(),
        );
        let conv = Conversation::new(vec![Message::system("s"), Message::user("q")]);
        assert!(matches!(
            mgr.optimize_for_context(conv, 512),
            Err(BudgetError::Tokenization(_))
        ));
    }

    #[test]
    fn conversation_without_user_is_rejected() {
        let conv = Conversation::new(vec![Message::system("lonely")]);
        assert!(matches!(
            manager(1100, 0).optimize_for_context(conv, 512),
            Err(BudgetError::InvalidConversation(ConversationError::NoUserMessage))
        ));
    }
}
