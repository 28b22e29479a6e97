use std::str::FromStr;

use anyhow::{Context, Result};

use crate::llm::Provider;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub groq_api_key: String,
    pub gemini_api_key: String,
    pub openai_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Upper bound for one finalize pipeline run, in seconds.
    pub finalize_timeout_secs: u64,
    /// Provider for the recommendation stage. The other stages stay on
    /// their defaults; this one is the most model-sensitive and gets an
    /// env escape hatch.
    pub recommendation_provider: Provider,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            groq_api_key: require_env("GROQ_API_KEY")?,
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            openai_api_key: require_env("OPENAI_API_KEY")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            finalize_timeout_secs: std::env::var("FINALIZE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse::<u64>()
                .context("FINALIZE_TIMEOUT_SECS must be a positive integer")?,
            recommendation_provider: match std::env::var("RECOMMENDATION_PROVIDER") {
                Ok(name) => Provider::from_str(&name)
                    .context("RECOMMENDATION_PROVIDER must be groq, gemini, or openai")?,
                Err(_) => Provider::OpenAi,
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}
