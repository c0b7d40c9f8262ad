//! Runtime configuration loaded from environment variables
//!
//! Binaries call `dotenv::dotenv().ok()` before `Settings::from_env()` so a
//! local `.env` file works the same as real environment variables.

use crate::error::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct Settings {
    /// API key for the code-generation service
    pub llm_api_key: String,

    /// Base URL of the code-generation service (OpenAI-compatible)
    pub llm_base_url: String,

    /// Model identifier sent with every generation request
    pub llm_model: String,

    /// Output-length budget for generated scripts
    pub llm_max_tokens: u32,

    /// Request timeout for the generation call, in seconds
    pub llm_timeout_secs: u64,

    /// PostgreSQL connection string (optional; in-memory catalog without it)
    pub database_url: Option<String>,

    /// Address the HTTP server binds to
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let llm_api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| EngineError::Config("LLM_API_KEY is not set".to_string()))?;

        Ok(Self {
            llm_api_key,
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4".to_string()),
            llm_max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            llm_timeout_secs: std::env::var("LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            database_url: std::env::var("DATABASE_URL").ok(),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }
}
