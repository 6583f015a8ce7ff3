//! Read-only room listing.

use crate::message::ChatTurn;
use crate::session::Transcript;
use crate::store::TranscriptStore;
use aichat_core::RoomId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A room and a copy of its transcript, assembled on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    /// The room.
    pub room_id: RoomId,
    /// The session's turns, oldest first.
    pub chat_messages: Vec<ChatTurn>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the last exchange was recorded.
    pub last_active_at: DateTime<Utc>,
}

impl RoomSummary {
    /// Builds a summary from a transcript snapshot.
    #[must_use]
    pub fn new(room_id: RoomId, transcript: &Transcript) -> Self {
        Self {
            room_id,
            chat_messages: transcript.turns().to_vec(),
            started_at: transcript.started_at(),
            last_active_at: transcript.last_active_at(),
        }
    }
}

/// Lists every room with an active session, ordered by room ID.
#[must_use]
pub fn list_rooms(store: &TranscriptStore) -> Vec<RoomSummary> {
    store
        .list_all()
        .iter()
        .map(|(room_id, transcript)| RoomSummary::new(*room_id, transcript))
        .collect()
}
