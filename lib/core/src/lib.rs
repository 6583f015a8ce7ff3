//! Core domain types and utilities for aichat.
//!
//! This crate provides the identifier types and error-handling alias
//! shared by the other aichat crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, RoomId};
