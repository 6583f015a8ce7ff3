//! aichat HTTP server.
//!
//! Binds the conversation service to the web client's chat endpoints,
//! loads configuration from the environment, and runs the idle-room
//! sweeper.

pub mod config;
pub mod error;
pub mod routes;
pub mod sweeper;

use aichat_ai::{LlmBackend, LlmError, OpenAiCompatibleBackend};
use aichat_conversation::{ConversationService, TranscriptStore};
use config::ServerConfig;
use std::sync::Arc;

/// Builds the conversation service described by the configuration.
///
/// # Errors
///
/// Returns an error if the provider configuration is invalid.
pub fn build_service(config: &ServerConfig) -> Result<ConversationService, LlmError> {
    let backend: Arc<dyn LlmBackend> =
        Arc::new(OpenAiCompatibleBackend::new(config.provider.clone())?);

    let store = match config.session.max_rooms {
        Some(max_rooms) => TranscriptStore::with_max_rooms(max_rooms),
        None => TranscriptStore::new(),
    };

    let mut service = ConversationService::new(Arc::new(store), backend, config.session.policy())
        .with_reply_timeout(config.provider.timeout());
    if let Some(system_prompt) = &config.session.system_prompt {
        service = service.with_system_prompt(system_prompt.clone());
    }
    Ok(service)
}
