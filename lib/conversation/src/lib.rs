//! Room conversations for aichat.
//!
//! This crate provides:
//!
//! - **Transcript Store**: per-room transcripts with per-room serialization
//! - **Session Policy**: start tokens and end markers
//! - **Conversation Service**: one request/response cycle against a provider
//! - **Room Listing**: read-only snapshots of every active room

pub mod error;
pub mod listing;
pub mod message;
pub mod policy;
pub mod service;
pub mod session;
pub mod store;

pub use error::{ConversationError, StoreError};
pub use listing::{RoomSummary, list_rooms};
pub use message::{ChatTurn, TurnRole};
pub use policy::{PromptSignal, ReplySignal, SessionPolicy};
pub use service::{ConversationService, DEFAULT_REPLY_TIMEOUT};
pub use session::{SessionState, Transcript};
pub use store::{RoomGuard, TranscriptStore};
