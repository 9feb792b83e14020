//! Runtime configuration for the study assistant.
//!
//! Values come from environment variables; anything unset falls back to the
//! defaults below.

use std::fmt;

use thiserror::Error;
use url::Url;

/// Environment variable holding the provider API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable overriding the provider base URL.
pub const BASE_URL_ENV: &str = "STUDY_ASSISTANT_BASE_URL";
/// Environment variable overriding the model.
pub const MODEL_ENV: &str = "STUDY_ASSISTANT_MODEL";
/// Environment variable overriding the sampling temperature.
pub const TEMPERATURE_ENV: &str = "STUDY_ASSISTANT_TEMPERATURE";
/// Environment variable overriding the answer token budget.
pub const MAX_TOKENS_ENV: &str = "STUDY_ASSISTANT_MAX_TOKENS";
/// Environment variable overriding the system prompt.
pub const SYSTEM_PROMPT_ENV: &str = "STUDY_ASSISTANT_SYSTEM_PROMPT";
/// Environment variable overriding the listening port.
pub const PORT_ENV: &str = "STUDY_ASSISTANT_PORT";
/// Environment variable overriding how long an idle session is kept, in seconds.
pub const SESSION_TTL_ENV: &str = "STUDY_ASSISTANT_SESSION_TTL_SECS";

/// Default provider base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default completion model.
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
/// Default system prompt.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default idle session lifetime.
const DEFAULT_SESSION_TTL_SECONDS: u64 = 60 * 60 * 24;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Base URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

/// Convenience result alias for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Provider and server settings.
#[derive(Clone)]
pub struct AssistantConfig {
    /// Provider API key; answering fails without one.
    pub api_key: Option<String>,
    /// Provider base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Completion model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per answer.
    pub max_tokens: u32,
    /// System prompt sent before every conversation.
    pub system_prompt: String,
    /// HTTP listening port.
    pub port: u16,
    /// Sessions unused for longer than this are dropped.
    pub session_ttl_seconds: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 200,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            port: DEFAULT_PORT,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }
}

impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("port", &self.port)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .finish()
    }
}

impl AssistantConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed, or the result is invalid.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed, or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        config.api_key = get(API_KEY_ENV);
        if let Some(base_url) = get(BASE_URL_ENV) {
            config.base_url = base_url;
        }
        if let Some(model) = get(MODEL_ENV) {
            config.model = model;
        }
        if let Some(prompt) = get(SYSTEM_PROMPT_ENV) {
            config.system_prompt = prompt;
        }
        if let Some(raw) = get(TEMPERATURE_ENV) {
            config.temperature = parse_var(TEMPERATURE_ENV, &raw)?;
        }
        if let Some(raw) = get(MAX_TOKENS_ENV) {
            config.max_tokens = parse_var(MAX_TOKENS_ENV, &raw)?;
        }
        if let Some(raw) = get(PORT_ENV) {
            config.port = parse_var(PORT_ENV, &raw)?;
        }
        if let Some(raw) = get(SESSION_TTL_ENV) {
            config.session_ttl_seconds = parse_var(SESSION_TTL_ENV, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within 0..=2, got {}",
                self.temperature
            )));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be > 0".to_string()));
        }

        if self.session_ttl_seconds == 0 || i64::try_from(self.session_ttl_seconds).is_err() {
            return Err(ConfigError::Invalid(
                "session_ttl_seconds must be > 0 and fit in i64".to_string(),
            ));
        }

        Url::parse(&self.base_url)?;

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} has unparsable value {raw:?}")))
}
