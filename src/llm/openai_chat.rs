//! Blocking client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! The client sends the system prompt, the active conversation and the new
//! question as one message list and returns the first choice's text.
//! Provider failures are surfaced as [`InferenceError`] and never retried.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AssistantConfig;
use crate::conversation::Turn;

/// Connect timeout for the provider.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Overall request timeout, generation included.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors produced while asking the provider for an answer.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// No API key is configured.
    #[error("API key required to connect to the model provider")]
    MissingApiKey,
    /// The provider rejected the credentials.
    #[error("authentication failed (http {0})")]
    Authentication(u16),
    /// Rate limit or billing quota exhausted.
    #[error("quota exceeded")]
    QuotaExceeded,
    /// Any other non-success status.
    #[error("provider http status not ok: {0}")]
    HttpStatus(u16),
    /// The body did not contain an answer.
    #[error("provider response malformed")]
    MalformedResponse,
    /// The body was not valid JSON for a completion.
    #[error("provider response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    /// Connection, TLS or timeout failure.
    #[error("http client error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl InferenceError {
    /// Map a non-success HTTP status to an error.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication(status),
            429 => Self::QuotaExceeded,
            _ => Self::HttpStatus(status),
        }
    }
}

/// Something that can answer a question given the conversation so far.
pub trait ChatCompletion: Send + Sync {
    /// Model identifier reported back to callers.
    fn model(&self) -> &str;

    /// Produce an answer to `question` with `history` as prior context.
    ///
    /// # Errors
    /// Returns an error when the provider cannot be reached or refuses the request.
    fn complete(
        &self,
        system_prompt: &str,
        history: &[Turn],
        question: &str,
    ) -> Result<String, InferenceError>;
}

/// One chat message on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: &'static str,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    fn new(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }
}

/// Build the provider message list: system prompt, prior turns, then the question.
#[must_use]
pub fn build_messages(system_prompt: &str, history: &[Turn], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::new("system", system_prompt));
    for turn in history {
        messages.push(ChatMessage::new("user", turn.question()));
        messages.push(ChatMessage::new("assistant", turn.answer()));
    }
    messages.push(ChatMessage::new("user", question));
    messages
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Pull the trimmed first-choice text out of a completion body.
fn extract_answer(body: &str) -> Result<String, InferenceError> {
    let response: CompletionResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or(InferenceError::MalformedResponse)
}

/// Blocking chat-completion client for OpenAI-compatible APIs.
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiChatClient {
    /// Create a client from the assistant configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AssistantConfig) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CLIENT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

impl ChatCompletion for OpenAiChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    fn complete(
        &self,
        system_prompt: &str,
        history: &[Turn],
        question: &str,
    ) -> Result<String, InferenceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(InferenceError::MissingApiKey)?;

        let request = CompletionRequest {
            model: &self.model,
            messages: build_messages(system_prompt, history, question),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            "Requesting completion from {} ({} prior turns)",
            self.model,
            history.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Provider returned {status}");
            return Err(InferenceError::from_status(status.as_u16()));
        }

        extract_answer(&response.text()?)
    }
}
