//! Code generation client - thin adapter over the external LLM service
//!
//! The pipeline hands over an instruction payload and gets raw text back.
//! Transport failures and timeouts surface as `Generation` errors and abort
//! the whole request; there is no automatic retry.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{EngineError, Result};

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Send the instruction payload, return the raw generated text.
    async fn generate(&self, instructions: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.llm_timeout_secs))
            .build()
            .map_err(|e| EngineError::Generation(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            api_key: settings.llm_api_key.clone(),
            base_url: settings.llm_base_url.clone(),
            model: settings.llm_model.clone(),
            max_tokens: settings.llm_max_tokens,
        })
    }
}

#[async_trait]
impl CodeGenerator for LlmClient {
    async fn generate(&self, instructions: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a precise transform-script generator. \
                                Return only the script, no explanations."
                },
                {"role": "user", "content": instructions}
            ],
            "temperature": 0.1,
            "max_tokens": self.max_tokens
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::Generation(format!(
                "LLM API returned {}: {}",
                status, detail
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Generation(format!("failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| EngineError::Generation("no content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}
