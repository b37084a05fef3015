//! LLM API HTTP Client
//!
//! Supports Gemini, Claude and OpenAI-compatible APIs behind one
//! single-shot `generate(prompt)` call.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{Error, Result};

use super::types::*;

/// Single-shot text generation, no conversation state
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send one prompt and return the raw text reply
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// LLM API client
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    provider: LlmProvider,
}

impl LlmClient {
    /// Create a new LLM client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;

        let base_url = match &config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match config.provider {
                LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta".to_string(),
                LlmProvider::Claude => "https://api.anthropic.com/v1".to_string(),
                LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
            },
        };

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url,
            provider: config.provider.clone(),
        })
    }

    /// Get the provider type
    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    /// Send request to the Gemini API
    async fn send_gemini_request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        debug!("Sending request to Gemini API: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&GenerateContentRequest::from_prompt(prompt))
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("Gemini API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        info!(
            "Gemini API response: finish_reason={:?}",
            parsed.candidates.first().and_then(|c| c.finish_reason.as_deref())
        );

        Ok(parsed.text())
    }

    /// Send request to the Claude API
    async fn send_claude_request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/messages", self.base_url);

        debug!("Sending request to Claude API: {}", url);

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            messages: vec![Message::user(prompt)],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("Claude API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        info!(
            "Claude API response: stop_reason={:?}, tokens={}",
            parsed.stop_reason,
            parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0)
        );

        Ok(parsed.text())
    }

    /// Send request to an OpenAI-compatible API
    async fn send_openai_request(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!("Sending request to OpenAI-compatible API: {}", url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![OpenAiMessage::user(prompt)],
            max_tokens: Some(4096),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("OpenAI API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        info!(
            "OpenAI API response: finish_reason={:?}",
            parsed.choices.first().and_then(|c| c.finish_reason.as_deref())
        );

        Ok(parsed.text())
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::Gemini => self.send_gemini_request(prompt).await,
            LlmProvider::Claude => self.send_claude_request(prompt).await,
            LlmProvider::OpenAi => self.send_openai_request(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(provider: LlmProvider, base_url: &str) -> LlmConfig {
        LlmConfig {
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            provider,
            base_url: Some(base_url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_base_urls() {
        let gemini = LlmClient::new(&LlmConfig::default()).unwrap();
        assert_eq!(gemini.base_url, "https://generativelanguage.googleapis.com/v1beta");

        let claude = LlmClient::new(&LlmConfig {
            provider: LlmProvider::Claude,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(claude.base_url, "https://api.anthropic.com/v1");
        assert_eq!(claude.provider(), &LlmProvider::Claude);
    }

    #[tokio::test]
    async fn test_gemini_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/test-model:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "{\"license_number\":\"1\"}"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(LlmProvider::Gemini, &server.uri())).unwrap();
        let text = client.generate("prompt").await.unwrap();
        assert_eq!(text, "{\"license_number\":\"1\"}");
    }

    #[tokio::test]
    async fn test_claude_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "hi"}],
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(LlmProvider::Claude, &server.uri())).unwrap();
        assert_eq!(client.generate("prompt").await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_openai_generate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "ok"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(LlmProvider::OpenAi, &server.uri())).unwrap();
        assert_eq!(client.generate("prompt").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let client = LlmClient::new(&config(LlmProvider::Gemini, &server.uri())).unwrap();
        let err = client.generate("prompt").await.unwrap_err();
        assert!(matches!(err, Error::LlmApi(msg) if msg.contains("quota")));
    }
}
