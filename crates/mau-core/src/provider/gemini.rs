//! Gemini generateContent adapter.

use super::{ProviderError, TextProvider};
use serde_json::{json, Value};
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Primary chat model.
pub const GEMINI_FLASH: &str = "gemini-2.5-flash";
/// Cheaper backup model.
pub const GEMINI_FLASH_LITE: &str = "gemini-2.5-flash-lite";

/// Fixed per-call budget; the cascade moves on when it elapses.
const CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Adapter for the Gemini REST API. Supports a native system_instruction
/// block, so the persona travels separately from the prompt.
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>, model: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(CALL_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl TextProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, system: Option<&str>)
        -> Result<String, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::Disabled)?;
        let url = format!("{}/{}:generateContent?key={}", API_BASE, self.model, api_key);

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        if let Some(system_text) = system {
            body["system_instruction"] = json!({ "parts": [{ "text": system_text }] });
        }

        let response = self.http.post(&url).json(&body).send().await.map_err(|e| {
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

        if let Some(reason) = value
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(|r| r.as_str())
        {
            return Err(ProviderError::SafetyBlocked(reason.to_string()));
        }

        let candidate = value
            .get("candidates")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ProviderError::InvalidResponse("no candidates".to_string()))?;

        if candidate.get("finishReason").and_then(|r| r.as_str()) == Some("SAFETY") {
            return Err(ProviderError::SafetyBlocked("candidate blocked".to_string()));
        }

        candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("no text part".to_string()))
    }
}
