//! OpenAI-compatible chat completions backend.
//!
//! Speaks the `POST {base_url}/chat/completions` protocol shared by most
//! hosted providers, including Volcengine Ark (which also exposes bot ids
//! under `/bots/chat/completions`).

use crate::backend::{LlmBackend, LlmMessage, LlmRequest, LlmResponse, TokenUsage};
use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Configuration for an OpenAI-compatible backend.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiCompatibleConfig {
    /// Base URL for the API, e.g. `https://ark.cn-beijing.volces.com/api/v3`.
    pub base_url: String,

    /// API key sent as a bearer token (if required).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model or bot identifier.
    pub model: String,

    /// Path of the completions endpoint, relative to `base_url`.
    #[serde(default = "default_completions_path")]
    pub completions_path: String,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Sampling temperature applied when the request does not set one.
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_completions_path() -> String {
    "/chat/completions".to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

impl OpenAiCompatibleConfig {
    /// Creates a configuration with default path and timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            completions_path: default_completions_path(),
            timeout_seconds: default_timeout_seconds(),
            temperature: None,
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Returns the full completions endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.completions_path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<LlmMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Backend for any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    config: OpenAiCompatibleConfig,
    endpoint: String,
}

impl OpenAiCompatibleBackend {
    /// Creates a backend from its configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete or the HTTP
    /// client cannot be built.
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::InvalidConfig {
                reason: "base_url is empty".to_string(),
            });
        }
        if config.model.trim().is_empty() {
            return Err(LlmError::InvalidConfig {
                reason: "model is empty".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: e.to_string(),
            })?;

        let endpoint = config.endpoint();
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    fn body<'a>(&'a self, request: &LlmRequest) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.config.model,
            messages: request.wire_messages(),
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens,
        }
    }
}

fn parse_response(body: &str, fallback_model: &str) -> Result<LlmResponse, LlmError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| LlmError::ResponseParseFailed {
            reason: e.to_string(),
        })?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.is_empty())
        .ok_or(LlmError::EmptyResponse)?;

    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        usage,
        model: parsed.model.unwrap_or_else(|| fallback_model.to_string()),
    })
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    #[instrument(skip(self, request), fields(model = %self.config.model, messages = request.messages.len()))]
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut http = self.client.post(&self.endpoint).json(&self.body(request));

        if let Some(api_key) = &self.config.api_key
            && !api_key.is_empty()
        {
            http = http.bearer_auth(api_key);
        }

        let response = http.send().await.map_err(|e| {
            warn!(error = %e, endpoint = %self.endpoint, "Failed to reach completion endpoint");
            if e.is_timeout() {
                LlmError::Timeout {
                    after_secs: self.config.timeout_seconds,
                }
            } else {
                LlmError::RequestFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    after_secs: self.config.timeout_seconds,
                }
            } else {
                LlmError::ResponseParseFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        if !status.is_success() {
            warn!(
                endpoint = %self.endpoint,
                status = %status,
                body = %body,
                "Completion endpoint returned error"
            );
            return Err(LlmError::ProviderUnavailable {
                provider: self.provider().to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let parsed = parse_response(&body, &self.config.model)?;
        debug!(
            total_tokens = parsed.usage.total(),
            reply_len = parsed.content.len(),
            "Completion received"
        );
        Ok(parsed)
    }

    fn provider(&self) -> &str {
        "openai_compatible"
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
