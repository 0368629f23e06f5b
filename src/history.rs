//! # Conversation History
//!
//! The client's copy of the conversation. The backend is authoritative: every
//! history snapshot it returns replaces this copy wholesale. The client never
//! merges, reorders, or deduplicates turns.
//!
//! ## Single Writer:
//! Only the message router holds `&mut ConversationHistory`, and it only writes
//! when a backend response is confirmed. Other components get a clone
//! (`snapshot`) or a shared reference.

use serde::{Deserialize, Serialize};

/// Who said a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One utterance in the conversation, as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[cfg(test)]
impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the local copy with the backend's echo.
    pub fn replace_from_echo(&mut self, echoed: Vec<Turn>) {
        self.turns = echoed;
    }

    /// Forget everything, after the backend confirmed `clear_history`.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Owned copy handed to the audio exchange task.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_replaces_instead_of_merging() {
        let mut history = ConversationHistory::new();
        history.replace_from_echo(vec![Turn::user("a"), Turn::assistant("b")]);

        let echoed = vec![Turn::user("Hello"), Turn::assistant("Hi")];
        history.replace_from_echo(echoed.clone());
        assert_eq!(history.turns(), echoed.as_slice());
    }

    #[test]
    fn test_json_shape() {
        let mut history = ConversationHistory::new();
        assert_eq!(serde_json::to_string(history.turns()).unwrap(), "[]");

        history.replace_from_echo(vec![Turn::user("Hello")]);
        assert_eq!(
            serde_json::to_string(&history.snapshot()).unwrap(),
            r#"[{"role":"user","content":"Hello"}]"#
        );

        history.clear();
        assert!(history.turns().is_empty());
    }
}
