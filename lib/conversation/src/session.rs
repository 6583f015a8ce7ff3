//! Per-room session state.
//!
//! A room is either `Inactive` or `Active` with a transcript. Transcripts
//! only grow by whole user/assistant exchanges and are dropped in one
//! piece when the session ends.

use crate::message::{ChatTurn, TurnRole};
use aichat_ai::LlmMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The ordered turns of one room's active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
    started_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

impl Transcript {
    /// Creates an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            turns: Vec::new(),
            started_at: now,
            last_active_at: now,
        }
    }

    /// Appends a user turn and the assistant's reply to it.
    pub(crate) fn push_exchange(&mut self, user: ChatTurn, assistant: ChatTurn) {
        debug_assert_eq!(user.role(), TurnRole::User);
        debug_assert_eq!(assistant.role(), TurnRole::Assistant);
        self.turns.push(user);
        self.turns.push(assistant);
        self.last_active_at = Utc::now();
    }

    /// Returns the turns, oldest first.
    #[must_use]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Returns the number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Returns the last turn, if any.
    #[must_use]
    pub fn last_turn(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    /// Returns true if nothing happened in this session since `cutoff`.
    #[must_use]
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_active_at < cutoff
    }

    /// Converts the transcript into provider messages, oldest first.
    #[must_use]
    pub fn to_llm_messages(&self) -> Vec<LlmMessage> {
        self.turns.iter().map(ChatTurn::to_llm_message).collect()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// The state of a room's session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No session: the room waits for a start token.
    #[default]
    Inactive,
    /// A session is running.
    Active(Transcript),
}

impl SessionState {
    /// Returns true if a session is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    /// Returns the transcript of the running session.
    #[must_use]
    pub fn transcript(&self) -> Option<&Transcript> {
        match self {
            Self::Active(transcript) => Some(transcript),
            Self::Inactive => None,
        }
    }

    pub(crate) fn transcript_mut(&mut self) -> Option<&mut Transcript> {
        match self {
            Self::Active(transcript) => Some(transcript),
            Self::Inactive => None,
        }
    }
}
