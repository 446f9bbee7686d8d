use serde::{Deserialize, Serialize};

pub const USER_ROLE: &str = "user";
pub const AI_ROLE: &str = "ai";

/// One message of a prior transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl TranscriptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: USER_ROLE.to_string(),
            text: Some(text.into()),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            role: AI_ROLE.to_string(),
            text: Some(text.into()),
        }
    }

    fn is_user(&self) -> bool {
        self.role == USER_ROLE
    }

    fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// A (user, assistant) exchange used to seed model context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

/// Pairs each user message with the reply directly after it. User messages
/// without an immediate non-user reply are skipped.
pub fn build_history(messages: &[TranscriptMessage]) -> Vec<ConversationTurn> {
    messages
        .windows(2)
        .filter_map(|pair| {
            let (prompt, reply) = (&pair[0], &pair[1]);
            if !prompt.is_user() || reply.is_user() {
                return None;
            }
            Some(ConversationTurn {
                user: prompt.non_empty_text()?.to_string(),
                assistant: reply.non_empty_text()?.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_unanswered_user_turn_is_dropped() {
        let transcript = vec![
            TranscriptMessage::user("hi"),
            TranscriptMessage::ai("hello"),
            TranscriptMessage::user("bye"),
        ];
        assert_eq!(
            build_history(&transcript),
            vec![ConversationTurn {
                user: "hi".to_string(),
                assistant: "hello".to_string(),
            }]
        );
    }

    #[test]
    fn consecutive_user_messages_pair_only_the_last() {
        let transcript = vec![
            TranscriptMessage::user("first"),
            TranscriptMessage::user("second"),
            TranscriptMessage::ai("reply"),
        ];
        let history = build_history(&transcript);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user, "second");
    }

    #[test]
    fn empty_text_breaks_a_pair() {
        let transcript = vec![
            TranscriptMessage::user("question"),
            TranscriptMessage {
                role: AI_ROLE.to_string(),
                text: None,
            },
            TranscriptMessage::user("again"),
            TranscriptMessage::ai("answer"),
        ];
        let history = build_history(&transcript);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user, "again");
        assert_eq!(history[0].assistant, "answer");
    }

    #[test]
    fn empty_transcript_builds_no_history() {
        assert!(build_history(&[]).is_empty());
        assert!(build_history(&[TranscriptMessage::user("alone")]).is_empty());
    }
}
