//! Language model service abstraction.
//!
//! The synthesizer only needs `complete(prompt, temperature) -> text`.
//! Two HTTP providers are available:
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"openai"` | [`OpenAIChat`] | `POST /v1/chat/completions` |
//! | `"ollama"` | [`OllamaGenerate`] | `POST /api/generate` |
//!
//! Both share the retry and backoff policy in [`crate::http`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{QaError, Result};
use crate::http;

/// A text completion service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce a completion for `prompt`.
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String>;
}

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_retries: u32,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| QaError::config("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: http::client(config.timeout_secs, "OpenAI chat")?,
            api_key,
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = http::post_json_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI chat",
        )
        .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| QaError::external("OpenAI chat", "response missing choices[0].message.content"))
}

/// Ollama `/api/generate` with streaming disabled.
pub struct OllamaGenerate {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaGenerate {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http::client(config.timeout_secs, "Ollama generate")?,
            url,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaGenerate {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": temperature },
        });
        let json = http::post_json_with_retry(
            &self.client,
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama generate",
        )
        .await?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| QaError::external("Ollama generate", "response missing 'response' field"))
    }
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerate::new(config)?)),
        other => Err(QaError::config(format!("Unknown llm provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Click forgot password." } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Click forgot password.");
    }

    #[test]
    fn chat_without_choices_is_external_error() {
        let err = parse_chat_response(&serde_json::json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, QaError::ExternalService { .. }));
    }

    #[test]
    fn ollama_provider_needs_no_credentials() {
        let cfg = LlmConfig {
            provider: "ollama".into(),
            model: "llama3".into(),
            ..LlmConfig::default()
        };
        let llm = create_llm(&cfg).unwrap();
        assert_eq!(llm.model_name(), "llama3");
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let cfg = LlmConfig {
            provider: "palm".into(),
            ..LlmConfig::default()
        };
        assert!(matches!(create_llm(&cfg), Err(QaError::Config(_))));
    }
}
