//! Inbound message classification: trigger-word filter, "id" diagnostic, and
//! allow-list gating. Pure functions; all I/O (replying, logging) happens in the gateway.

use crate::channels::InboundMessage;
use crate::config::AccessConfig;

/// Characters that may follow a trigger word (besides whitespace and end of text).
const SEPARATORS: &[char] = &[',', '.', ':', ';', '!', '?', '-'];

/// Diagnostic command: replies with conversation and sender identifiers,
/// bypassing both the trigger filter and the allow-lists so operators can
/// collect identifiers for the allow-lists.
const ID_COMMAND: &str = "id";

/// Outcome of classifying one inbound text message. The classification is
/// total: every message maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Not addressed to the bot (no trigger word, or a bare trigger with
    /// nothing after it). The deliberate response is silence.
    Ignore,
    /// The "id" diagnostic; reply with the raw identifiers.
    Identify,
    /// Trigger matched but neither the chat nor the sender is allow-listed.
    Denied,
    /// Forward the residual query to the dispatcher.
    Forward { query: String },
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || SEPARATORS.contains(&c)
}

/// Case-insensitive prefix match of `word` against `text`. Returns the rest of
/// `text` after the word when it matches and is followed by end-of-text or a
/// separator. Char-wise lowercase comparison keeps this Unicode-aware
/// ("ЧАТ" matches the trigger "чат", "чатик" does not).
fn strip_trigger<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let mut rest = text;
    for wc in word.chars() {
        let mut it = rest.chars();
        let tc = it.next()?;
        if !tc.to_lowercase().eq(wc.to_lowercase()) {
            return None;
        }
        rest = it.as_str();
    }
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if is_separator(c) => Some(rest),
        Some(_) => None,
    }
}

/// True when the chat or the sender passes the allow-lists. Both lists empty
/// means the bot is open to everyone.
fn is_allowed(access: &AccessConfig, conversation_id: &str, sender_id: &str) -> bool {
    if access.allowed_chats.is_empty() && access.allowed_users.is_empty() {
        return true;
    }
    access.allowed_chats.iter().any(|c| c == conversation_id)
        || access.allowed_users.iter().any(|u| u == sender_id)
}

/// Classify one inbound message. The trigger check runs before the access
/// check, so non-trigger text from a disallowed chat stays silent and only
/// trigger-matching messages ever see the denial reply.
pub fn classify(msg: &InboundMessage, triggers: &[String], access: &AccessConfig) -> Classification {
    let text = msg.text.trim();
    if text.is_empty() {
        return Classification::Ignore;
    }
    if text.to_lowercase() == ID_COMMAND {
        return Classification::Identify;
    }

    let residual = triggers
        .iter()
        .find_map(|word| strip_trigger(text, word));
    let residual = match residual {
        Some(rest) => rest.trim_start_matches(is_separator).trim(),
        None => return Classification::Ignore,
    };
    if residual.is_empty() {
        return Classification::Ignore;
    }

    if !is_allowed(access, &msg.conversation_id, &msg.sender_id) {
        return Classification::Denied;
    }

    Classification::Forward {
        query: residual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> InboundMessage {
        InboundMessage {
            channel_id: "telegram".to_string(),
            conversation_id: "-100123".to_string(),
            sender_id: "42".to_string(),
            sender_username: Some("olena".to_string()),
            sender_name: Some("Олена".to_string()),
            message_id: 7,
            thread_id: None,
            text: text.to_string(),
        }
    }

    fn triggers() -> Vec<String> {
        vec!["чат".to_string(), "кріш".to_string()]
    }

    fn open() -> AccessConfig {
        AccessConfig::default()
    }

    fn forward(text: &str) -> Classification {
        classify(&msg(text), &triggers(), &open())
    }

    #[test]
    fn plain_text_is_ignored() {
        assert_eq!(forward("добрий день"), Classification::Ignore);
        assert_eq!(forward("hello there"), Classification::Ignore);
    }

    #[test]
    fn trigger_with_space_forwards_residual() {
        assert_eq!(
            forward("чат привіт"),
            Classification::Forward {
                query: "привіт".to_string()
            }
        );
    }

    #[test]
    fn trigger_is_case_insensitive_unicode() {
        assert_eq!(
            forward("ЧАТ привіт"),
            Classification::Forward {
                query: "привіт".to_string()
            }
        );
        assert_eq!(
            forward("Кріш як твій настрій"),
            Classification::Forward {
                query: "як твій настрій".to_string()
            }
        );
    }

    #[test]
    fn trigger_followed_by_punctuation_separator() {
        assert_eq!(
            forward("чат, привіт"),
            Classification::Forward {
                query: "привіт".to_string()
            }
        );
        assert_eq!(
            forward("кріш! скажи щось"),
            Classification::Forward {
                query: "скажи щось".to_string()
            }
        );
    }

    #[test]
    fn bare_trigger_is_ignored() {
        assert_eq!(forward("чат"), Classification::Ignore);
        assert_eq!(forward("кріш!"), Classification::Ignore);
        assert_eq!(forward("  чат ,,, "), Classification::Ignore);
    }

    #[test]
    fn trigger_must_be_a_whole_word() {
        // No separator after the word: not a trigger.
        assert_eq!(forward("чатик привіт"), Classification::Ignore);
    }

    #[test]
    fn trigger_mid_sentence_does_not_fire() {
        assert_eq!(forward("це не чат привіт"), Classification::Ignore);
    }

    #[test]
    fn leading_whitespace_is_tolerated() {
        assert_eq!(
            forward("   чат привіт"),
            Classification::Forward {
                query: "привіт".to_string()
            }
        );
    }

    #[test]
    fn empty_text_is_ignored() {
        assert_eq!(forward(""), Classification::Ignore);
        assert_eq!(forward("   "), Classification::Ignore);
    }

    #[test]
    fn id_command_any_case_identifies() {
        assert_eq!(forward("id"), Classification::Identify);
        assert_eq!(forward("ID"), Classification::Identify);
        assert_eq!(forward("  Id "), Classification::Identify);
    }

    #[test]
    fn id_command_bypasses_allow_lists() {
        let access = AccessConfig {
            allowed_chats: vec!["-999".to_string()],
            allowed_users: vec![],
        };
        assert_eq!(
            classify(&msg("id"), &triggers(), &access),
            Classification::Identify
        );
    }

    #[test]
    fn disallowed_chat_gets_denied_only_on_trigger() {
        let access = AccessConfig {
            allowed_chats: vec!["-999".to_string()],
            allowed_users: vec!["777".to_string()],
        };
        // Trigger-matching text from a disallowed chat: denial.
        assert_eq!(
            classify(&msg("чат привіт"), &triggers(), &access),
            Classification::Denied
        );
        // Non-trigger text never reaches the access check: silence.
        assert_eq!(
            classify(&msg("привіт"), &triggers(), &access),
            Classification::Ignore
        );
    }

    #[test]
    fn allowed_chat_or_allowed_sender_passes() {
        let by_chat = AccessConfig {
            allowed_chats: vec!["-100123".to_string()],
            allowed_users: vec![],
        };
        let by_user = AccessConfig {
            allowed_chats: vec![],
            allowed_users: vec!["42".to_string()],
        };
        for access in [by_chat, by_user] {
            assert_eq!(
                classify(&msg("чат привіт"), &triggers(), &access),
                Classification::Forward {
                    query: "привіт".to_string()
                }
            );
        }
    }
}
