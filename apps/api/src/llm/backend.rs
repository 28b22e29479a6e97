//! Concrete reqwest-backed text backends, one per provider.
//!
//! Groq and OpenAI speak the chat-completions shape; Gemini speaks
//! `generateContent`. Models are intentionally hardcoded per backend to
//! prevent accidental drift.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CallOptions, Provider, ProviderError};

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const GROQ_MODEL: &str = "llama3-70b-8192";

const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o-mini";

/// System framing shared by the chat-shaped backends.
const SYSTEM_MESSAGE: &str = "You are a helpful AI career counselor.";

const CLIENT_TIMEOUT_SECS: u64 = 120;

/// A single interchangeable text-generation backend.
/// Carried in `LlmRouter` as `Arc<dyn TextBackend>` so tests can script
/// responses without the network.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(&self, prompt: &str, options: CallOptions)
        -> Result<String, ProviderError>;
}

fn http_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(CLIENT_TIMEOUT_SECS))
        .build()
        .expect("Failed to build HTTP client")
}

async fn read_api_error(provider: Provider, response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    ProviderError::Api {
        provider,
        status,
        message,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Chat-completions shape (Groq, OpenAI)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

async fn chat_generate(
    client: &Client,
    provider: Provider,
    url: &str,
    model: &str,
    api_key: &str,
    prompt: &str,
    options: CallOptions,
) -> Result<String, ProviderError> {
    let body = ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_MESSAGE,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ],
        temperature: options.temperature,
        max_tokens: options.max_tokens,
    };

    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|source| ProviderError::Http { provider, source })?;

    if !response.status().is_success() {
        return Err(read_api_error(provider, response).await);
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|source| ProviderError::Http { provider, source })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(ProviderError::EmptyResponse { provider })
}

pub struct GroqBackend {
    client: Client,
    api_key: String,
}

impl GroqBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(),
            api_key,
        }
    }
}

#[async_trait]
impl TextBackend for GroqBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: CallOptions,
    ) -> Result<String, ProviderError> {
        chat_generate(
            &self.client,
            Provider::Groq,
            GROQ_API_URL,
            GROQ_MODEL,
            &self.api_key,
            prompt,
            options,
        )
        .await
    }
}

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
}

impl OpenAiBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(),
            api_key,
        }
    }
}

#[async_trait]
impl TextBackend for OpenAiBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: CallOptions,
    ) -> Result<String, ProviderError> {
        chat_generate(
            &self.client,
            Provider::OpenAi,
            OPENAI_API_URL,
            OPENAI_MODEL,
            &self.api_key,
            prompt,
            options,
        )
        .await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gemini generateContent shape
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    parts: Option<Vec<GeminiCandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    text: Option<String>,
}

pub struct GeminiBackend {
    client: Client,
    api_key: String,
}

impl GeminiBackend {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(),
            api_key,
        }
    }
}

#[async_trait]
impl TextBackend for GeminiBackend {
    async fn generate(
        &self,
        prompt: &str,
        options: CallOptions,
    ) -> Result<String, ProviderError> {
        let provider = Provider::Gemini;

        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        };

        let response = self
            .client
            .post(GEMINI_API_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|source| ProviderError::Http { provider, source })?;

        if !response.status().is_success() {
            return Err(read_api_error(provider, response).await);
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|source| ProviderError::Http { provider, source })?;

        parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|p| p.into_iter().next())
            .and_then(|p| p.text)
            .ok_or(ProviderError::EmptyResponse { provider })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_serializes_expected_shape() {
        let body = ChatRequest {
            model: GROQ_MODEL,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                ChatMessage {
                    role: "user",
                    content: "hello",
                },
            ],
            temperature: 0.7,
            max_tokens: 1024,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "llama3-70b-8192");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["max_tokens"], 1024);
    }

    #[test]
    fn test_gemini_request_uses_camel_case_generation_config() {
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: "hi" }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.5,
                max_output_tokens: 256,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_chat_response_missing_content_yields_none() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }

    #[test]
    fn test_gemini_response_tolerates_missing_candidates() {
        let parsed: GeminiResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.candidates.is_none());
    }
}
