//! Conversation assembly from stored turns and a new user message.

use lantern_core::message::{ContentPart, Conversation, Message, Role};
use lantern_core::store::Turn;
use tracing::warn;

/// Placeholder left in history where a past turn carried an image.
pub const IMAGE_PLACEHOLDER: &str = "[Image was provided]";

/// The system prompt to use for a request.
///
/// Falls back to `default` when `requested` is missing or blank. Prompts over
/// `max_chars` characters are cut at the last sentence end if one is within 50
/// characters of the limit, otherwise at the last space if one is within 20,
/// otherwise exactly at the limit.
pub fn normalize_system_prompt(requested: Option<&str>, default: &str, max_chars: usize) -> String {
    let prompt = requested
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(default);

    let original_chars = prompt.chars().count();
    if original_chars <= max_chars {
        return prompt.to_string();
    }

    let head: String = prompt.chars().take(max_chars).collect();
    let head = head.trim();
    let char_pos = |byte: usize| head[..byte].chars().count();

    let period = head.rfind('.').filter(|&i| char_pos(i) + 50 > max_chars);
    let space = head.rfind(' ').filter(|&i| char_pos(i) + 20 > max_chars);
    let truncated = match (period, space) {
        (Some(i), _) => &head[..=i],
        (None, Some(i)) => &head[..i],
        (None, None) => head,
    };

    warn!(
        from = original_chars,
        to = truncated.chars().count(),
        "System prompt truncated"
    );
    truncated.to_string()
}

/// Replay stored turns as alternating user/assistant messages.
///
/// Empty questions and responses are skipped. Past images are not resent; the
/// user message notes that one was provided.
pub fn history_messages(turns: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(turns.len() * 2);
    for turn in turns {
        let mut content = Vec::new();
        if !turn.question.is_empty() {
            content.push(ContentPart::text(&turn.question));
        }
        if turn.has_image {
            content.push(ContentPart::text(IMAGE_PLACEHOLDER));
        }
        if !content.is_empty() {
            messages.push(Message::new(Role::User, content));
        }
        if !turn.response.is_empty() {
            messages.push(Message::assistant(&turn.response));
        }
    }
    messages
}

/// System prompt, then stored history, then the new user message.
pub fn assemble_conversation(system_prompt: String, history: &[Turn], user: Message) -> Conversation {
    let mut conversation = Conversation::new(vec![Message::system(system_prompt)]);
    for message in history_messages(history) {
        conversation.push(message);
    }
    conversation.push(user);
    conversation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_prompt_uses_default() {
        assert_eq!(normalize_system_prompt(None, "default", 2000), "default");
        assert_eq!(normalize_system_prompt(Some("   "), "default", 2000), "default");
        assert_eq!(normalize_system_prompt(Some("Be brief."), "default", 2000), "Be brief.");
    }

    #[test]
    fn long_prompt_cuts_at_sentence_end() {
        let prompt = format!("{}. {}", "a".repeat(1970), "b".repeat(100));
        let out = normalize_system_prompt(Some(&prompt), "", 2000);
        assert_eq!(out.len(), 1971);
        assert!(out.ends_with('.'));
    }

    #[test]
    fn long_prompt_cuts_at_word_when_no_nearby_period() {
        let prompt = format!("{}. {} {}", "a".repeat(100), "b".repeat(1890), "c".repeat(100));
        let out = normalize_system_prompt(Some(&prompt), "", 2000);
        // "a"*100 + ". " + "b"*1890 = 1992 chars, cut before the space
        assert_eq!(out.len(), 1992);
        assert!(out.ends_with('b'));
    }

    #[test]
    fn long_prompt_hard_cut_without_boundaries() {
        let prompt = "x".repeat(3000);
        let out = normalize_system_prompt(Some(&prompt), "", 2000);
        assert_eq!(out.chars().count(), 2000);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let prompt = "é".repeat(2500);
        let out = normalize_system_prompt(Some(&prompt), "", 2000);
        assert_eq!(out.chars().count(), 2000);
    }

    #[test]
    fn history_replays_turns_in_order() {
        let mut with_image = Turn::new("what is this?", "a cat");
        with_image.has_image = true;
        let turns = vec![Turn::new("hi", "hello"), with_image, Turn::new("", "unprompted")];

        let messages = history_messages(&turns);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant, Role::Assistant]
        );
        assert_eq!(messages[2].text(), format!("what is this? {IMAGE_PLACEHOLDER}"));
        assert_eq!(messages[4].text(), "unprompted");
    }

    #[test]
    fn assembled_conversation_is_valid() {
        let conversation = assemble_conversation(
            "sys".into(),
            &[Turn::new("q1", "r1")],
            Message::user("q2"),
        );
        assert!(conversation.validate().is_ok());
        assert_eq!(conversation.len(), 4);
        assert_eq!(conversation.latest_user_index(), Some(3));
        assert_eq!(conversation.messages[0].text(), "sys");
    }
}
