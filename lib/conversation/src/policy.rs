//! Session start and end detection.
//!
//! The web client starts a game by sending a fixed phrase, and the host
//! model announces the end of a game in its reply. The policy turns both
//! into explicit signals so the service never matches text itself.

use serde::{Deserialize, Serialize};

/// Default phrases that open a session.
pub const DEFAULT_START_TOKENS: &[&str] = &["开始", "start"];

/// Default reply fragments that close a session.
pub const DEFAULT_END_MARKERS: &[&str] = &["游戏结束", "session ended"];

/// What an inbound prompt means for a room without a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSignal {
    /// The prompt is a start token.
    Start,
    /// Any other prompt.
    Message,
}

/// What a provider reply means for the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySignal {
    /// The reply announces the end of the session.
    End,
    /// The session goes on.
    Continue,
}

/// Start tokens and end markers for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    start_tokens: Vec<String>,
    end_markers: Vec<String>,
}

impl SessionPolicy {
    /// Creates a policy. Blank entries are dropped: an empty end marker
    /// would match every reply.
    #[must_use]
    pub fn new<S, E>(start_tokens: S, end_markers: E) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        fn clean<I>(items: I) -> Vec<String>
        where
            I: IntoIterator,
            I::Item: Into<String>,
        {
            items
                .into_iter()
                .map(|item| item.into().trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        }

        Self {
            start_tokens: clean(start_tokens),
            end_markers: clean(end_markers),
        }
    }

    #[must_use]
    pub fn start_tokens(&self) -> &[String] {
        &self.start_tokens
    }

    #[must_use]
    pub fn end_markers(&self) -> &[String] {
        &self.end_markers
    }

    /// Classifies a prompt. Only a prompt equal to a start token starts a
    /// session; surrounding whitespace makes it an ordinary message.
    #[must_use]
    pub fn classify_prompt(&self, prompt: &str) -> PromptSignal {
        if self.start_tokens.iter().any(|token| token == prompt) {
            PromptSignal::Start
        } else {
            PromptSignal::Message
        }
    }

    /// Classifies a reply by substring match against the end markers.
    #[must_use]
    pub fn classify_reply(&self, reply: &str) -> ReplySignal {
        if self.end_markers.iter().any(|marker| reply.contains(marker.as_str())) {
            ReplySignal::End
        } else {
            ReplySignal::Continue
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_START_TOKENS.iter().copied(),
            DEFAULT_END_MARKERS.iter().copied(),
        )
    }
}
