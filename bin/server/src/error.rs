//! HTTP error responses.
//!
//! Conversation failures are mapped to a status code from the report's
//! current context. The full report is logged; the body is a short
//! user-facing message that never carries provider details.

use aichat_conversation::ConversationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rootcause::Report;

/// Errors returned by the chat handlers.
#[derive(Debug)]
pub struct ApiError {
    report: Report<ConversationError>,
    start_token: Option<String>,
}

impl ApiError {
    /// Wraps a conversation failure. `start_token` is suggested to the
    /// caller when the room has no session.
    pub fn new(report: Report<ConversationError>, start_token: Option<String>) -> Self {
        Self {
            report,
            start_token,
        }
    }

    /// Returns the status code this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.report.current_context() {
            ConversationError::SessionNotStarted { .. } => StatusCode::NOT_FOUND,
            ConversationError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ConversationError::ProviderFailed { .. } => StatusCode::BAD_GATEWAY,
            ConversationError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self.report.current_context() {
            ConversationError::SessionNotStarted { .. } => match &self.start_token {
                Some(token) => format!("No game is running in this room. Send \"{token}\" to start one."),
                None => "No game is running in this room.".to_string(),
            },
            ConversationError::CapacityExceeded { .. } => {
                tracing::warn!(error = %self.report, "Refused new session");
                "Too many rooms are active. Try again later.".to_string()
            }
            ConversationError::ProviderFailed { .. } => {
                tracing::error!(error = %self.report, "Completion provider failed");
                "The assistant is unavailable. Try again.".to_string()
            }
            ConversationError::Store { .. } => {
                tracing::error!(error = %self.report, "Store error");
                "Internal server error".to_string()
            }
        };

        (status, message).into_response()
    }
}
