//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: Errors from transcript store operations
//! - `ConversationError`: Errors surfaced to callers of the service, with
//!   store or provider errors attached as their cause

use aichat_core::RoomId;
use std::fmt;

/// Errors from transcript store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No transcript exists for the room.
    NotFound { room_id: RoomId },
    /// A transcript already exists for the room.
    AlreadyExists { room_id: RoomId },
    /// The configured room bound is reached.
    CapacityExceeded { max_rooms: usize },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { room_id } => write!(f, "no transcript for room {room_id}"),
            Self::AlreadyExists { room_id } => {
                write!(f, "transcript already exists for room {room_id}")
            }
            Self::CapacityExceeded { max_rooms } => {
                write!(f, "room limit of {max_rooms} reached")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors returned by the conversation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    /// The room has no session and the prompt was not a start token.
    SessionNotStarted { room_id: RoomId },
    /// No new session can be opened right now.
    CapacityExceeded { max_rooms: usize },
    /// The completion provider failed or timed out.
    ProviderFailed { room_id: RoomId },
    /// The store refused an operation (use as context wrapper).
    Store { room_id: RoomId },
}

impl ConversationError {
    /// Returns the room the error relates to, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::SessionNotStarted { room_id }
            | Self::ProviderFailed { room_id }
            | Self::Store { room_id } => Some(*room_id),
            Self::CapacityExceeded { .. } => None,
        }
    }
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotStarted { room_id } => {
                write!(f, "room {room_id} has no active session")
            }
            Self::CapacityExceeded { max_rooms } => {
                write!(f, "cannot open a session: {max_rooms} rooms already active")
            }
            Self::ProviderFailed { room_id } => {
                write!(f, "completion provider failed for room {room_id}")
            }
            Self::Store { room_id } => write!(f, "store operation failed for room {room_id}"),
        }
    }
}

impl std::error::Error for ConversationError {}
