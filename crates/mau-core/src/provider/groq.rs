//! Groq chat-completions adapter (OpenAI-compatible wire format).

use super::{ProviderError, TextProvider};
use serde_json::{json, Value};
use std::time::Duration;

const API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Model used both as the final chat fallback and as the SQL/extraction
/// workhorse.
pub const GROQ_LLAMA: &str = "llama-3.3-70b-versatile";

const CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Adapter for Groq. The system text rides as a leading "system" message;
/// the API has no separate instruction slot.
pub struct GroqProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl GroqProvider {
    /// Chat configuration (creative sampling, room for a full reply).
    pub fn new(api_key: Option<String>, model: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(CALL_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }

    /// Deterministic configuration for SQL generation and field extraction.
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait::async_trait]
impl TextProvider for GroqProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, system: Option<&str>)
        -> Result<String, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::Disabled)?;

        let mut messages = Vec::new();
        if let Some(system_text) = system {
            messages.push(json!({ "role": "system", "content": system_text }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .http
            .post(API_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        match response.status().as_u16() {
            404 => return Err(ProviderError::ModelNotFound),
            429 => return Err(ProviderError::Quota),
            s if s >= 400 => {
                let detail = response.text().await.unwrap_or_default();
                return Err(ProviderError::Network(format!("HTTP {}: {}", s, detail)));
            }
            _ => {}
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("no message content".to_string()))
    }
}
