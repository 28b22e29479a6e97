//! LLM provider layer: the single point of entry for all model calls.
//!
//! ARCHITECTURAL RULE: no other module may talk to a provider API directly.
//! All LLM interactions go through `LlmRouter::invoke`, which presents one
//! calling convention over the three interchangeable text backends.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub mod backend;
pub mod normalize;

use crate::config::Config;
use backend::{GeminiBackend, GroqBackend, OpenAiBackend, TextBackend};

/// Default sampling temperature when the caller does not override it.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default completion budget when the caller does not override it.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// The closed set of supported text-generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Groq,
    Gemini,
    OpenAi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Ok(Provider::Groq),
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAi),
            other => Err(ProviderError::Unsupported(other.to_string())),
        }
    }
}

/// Recognized per-call options. Temperature is clamped to [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl CallOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unsupported provider: {0}")]
    Unsupported(String),

    #[error("Empty prompt")]
    EmptyPrompt,

    #[error("HTTP error calling {provider}: {source}")]
    Http {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error (status {status}): {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an empty completion")]
    EmptyResponse { provider: Provider },
}

/// Routes `invoke(provider, prompt, options)` to the matching backend.
///
/// One attempt per invocation; a backend failure surfaces as a typed
/// `ProviderError` so a placeholder string never leaks into downstream
/// JSON parsing. Resilience is the pipeline's concern, which degrades
/// per stage instead of retrying.
#[derive(Clone)]
pub struct LlmRouter {
    groq: Arc<dyn TextBackend>,
    gemini: Arc<dyn TextBackend>,
    openai: Arc<dyn TextBackend>,
}

impl LlmRouter {
    pub fn new(
        groq: Arc<dyn TextBackend>,
        gemini: Arc<dyn TextBackend>,
        openai: Arc<dyn TextBackend>,
    ) -> Self {
        Self {
            groq,
            gemini,
            openai,
        }
    }

    /// Builds the production router with one reqwest-backed client per provider.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(GroqBackend::new(config.groq_api_key.clone())),
            Arc::new(GeminiBackend::new(config.gemini_api_key.clone())),
            Arc::new(OpenAiBackend::new(config.openai_api_key.clone())),
        )
    }

    /// Invokes the named backend and returns the raw completion text,
    /// trimmed of surrounding whitespace.
    pub async fn invoke(
        &self,
        provider: Provider,
        prompt: &str,
        options: CallOptions,
    ) -> Result<String, ProviderError> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::EmptyPrompt);
        }

        let backend = match provider {
            Provider::Groq => &self.groq,
            Provider::Gemini => &self.gemini,
            Provider::OpenAi => &self.openai,
        };

        let text = backend.generate(prompt, options).await?;
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Err(ProviderError::EmptyResponse { provider });
        }

        debug!(provider = %provider, chars = trimmed.len(), "LLM call succeeded");
        Ok(trimmed.to_string())
    }
}
