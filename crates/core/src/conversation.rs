//! Conversation history shared between a voice session and the agent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of history entries a session keeps.
pub const HISTORY_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the conversation: who said it and what was said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What the agent produced for one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgentResult {
    /// The reply to present to the user.
    pub reply: String,
    /// Names of the tools invoked while producing the reply, in first-use order.
    pub tools_used: Vec<String>,
}

/// Ordered history bounded to the most recent `limit` entries.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            turns: Vec::new(),
            limit,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Appends a completed user/assistant exchange and trims to the bound.
    pub fn record_exchange(&mut self, utterance: &str, reply: &str) {
        self.turns.push(Turn::user(utterance));
        self.turns.push(Turn::assistant(reply));
        if self.turns.len() > self.limit {
            let excess = self.turns.len() - self.limit;
            self.turns.drain(..excess);
        }
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(HISTORY_TURNS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_exchange_appends_in_order() {
        let mut history = ConversationHistory::new(10);
        history.record_exchange("add ten towels", "Added 10 towels.");

        assert_eq!(
            history.turns(),
            &[Turn::user("add ten towels"), Turn::assistant("Added 10 towels.")]
        );
    }

    #[test]
    fn test_history_is_trimmed_to_limit() {
        let mut history = ConversationHistory::new(4);
        for i in 0..5 {
            history.record_exchange(&format!("question {i}"), &format!("answer {i}"));
        }

        assert_eq!(history.len(), 4);
        assert_eq!(history.turns()[0], Turn::user("question 3"));
        assert_eq!(history.turns()[3], Turn::assistant("answer 4"));
    }

    #[test]
    fn test_odd_limit_keeps_most_recent_entries() {
        let mut history = ConversationHistory::new(3);
        history.record_exchange("one", "uno");
        history.record_exchange("two", "dos");

        assert_eq!(
            history.turns(),
            &[Turn::assistant("uno"), Turn::user("two"), Turn::assistant("dos")]
        );
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(format!("{}", Role::Assistant), "assistant");
    }
}
