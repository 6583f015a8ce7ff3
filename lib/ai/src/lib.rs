//! AI primitives for aichat.
//!
//! This crate provides the completion provider seam used by the
//! conversation service:
//!
//! - **Backend**: the [`LlmBackend`] trait and its request/response types
//! - **OpenAI-compatible client**: a reqwest-based backend for hosted
//!   chat completion APIs

pub mod backend;
pub mod error;
pub mod openai;

pub use backend::{LlmBackend, LlmMessage, LlmRequest, LlmResponse, MessageRole, TokenUsage};
pub use error::LlmError;
pub use openai::{OpenAiCompatibleBackend, OpenAiCompatibleConfig};
