//! Token usage breakdown for a conversation.

use lantern_core::message::Role;
use serde::{Deserialize, Serialize};

/// Token counts for one conversation.
///
/// `total` is exact (templated). The per-role figures are summed from
/// individual message counts and are best-effort; whatever the template adds on
/// top lands in `template_overhead`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudgetReport {
    pub total: usize,
    pub system: usize,
    pub user: usize,
    pub assistant: usize,
    pub template_overhead: usize,
}

impl TokenBudgetReport {
    /// Build a report from the templated total and per-message counts.
    pub fn from_counts(total: usize, per_message: impl IntoIterator<Item = (Role, usize)>) -> Self {
        let mut report = Self {
            total,
            ..Self::default()
        };
        for (role, tokens) in per_message {
            match role {
                Role::System => report.system += tokens,
                Role::User => report.user += tokens,
                Role::Assistant => report.assistant += tokens,
            }
        }
        report.template_overhead = total.saturating_sub(report.per_role_sum());
        report
    }

    pub fn per_role_sum(&self) -> usize {
        self.system + self.user + self.assistant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overhead_is_total_minus_roles() {
        let report = TokenBudgetReport::from_counts(
            120,
            [(Role::System, 20), (Role::User, 50), (Role::Assistant, 30), (Role::User, 5)],
        );
        assert_eq!(report.system, 20);
        assert_eq!(report.user, 55);
        assert_eq!(report.assistant, 30);
        assert_eq!(report.template_overhead, 15);
    }

    #[test]
    fn overhead_clamps_at_zero() {
        // Per-message tokenization can exceed the templated total when
        // separate encodings split words differently.
        let report = TokenBudgetReport::from_counts(10, [(Role::User, 12)]);
        assert_eq!(report.template_overhead, 0);
    }
}
