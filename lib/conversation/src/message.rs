//! Turn types for room transcripts.

use aichat_ai::LlmMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The player typing into the web client.
    User,
    /// The completion provider's reply.
    Assistant,
}

/// One turn of a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    role: TurnRole,
    content: String,
    created_at: DateTime<Utc>,
}

impl ChatTurn {
    /// Creates a new turn stamped with the current time.
    #[must_use]
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Creates a user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    /// Creates an assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    #[must_use]
    pub fn role(&self) -> TurnRole {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Converts the turn into the message shape the provider expects.
    #[must_use]
    pub fn to_llm_message(&self) -> LlmMessage {
        match self.role {
            TurnRole::User => LlmMessage::user(self.content.clone()),
            TurnRole::Assistant => LlmMessage::assistant(self.content.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aichat_ai::MessageRole;

    #[test]
    fn turn_creation() {
        let turn = ChatTurn::user("开始");
        assert_eq!(turn.role(), TurnRole::User);
        assert_eq!(turn.content(), "开始");
    }

    #[test]
    fn converts_to_llm_message() {
        let msg = ChatTurn::assistant("是。").to_llm_message();
        assert_eq!(msg.role, MessageRole::Assistant);
        assert_eq!(msg.content, "是。");
    }

    #[test]
    fn serializes_for_web_client() {
        let value = serde_json::to_value(ChatTurn::user("线索一")).expect("serialize");
        assert_eq!(value["role"], "user");
        assert_eq!(value["content"], "线索一");
        assert!(value.get("createdAt").is_some());
    }
}
