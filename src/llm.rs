//! Hosted chat-completions client.
//!
//! Speaks the OpenAI-compatible `POST {base_url}/chat/completions` protocol
//! that Groq exposes. One [`ChatModel::complete`] call is one request: no
//! streaming, no caching, no retry.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::ChatMessage;
use crate::traits::ChatModel;

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct ChatCompletionsClient {
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

impl ChatCompletionsClient {
    /// Build a client from config, reading the API key from
    /// `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key variable is unset or empty.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatModel for ChatCompletionsClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        tracing::debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Chat completion request to {} failed", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("LLM API error {}: {}", status, body_text);
        }

        let payload: Value = response
            .json()
            .await
            .context("LLM API returned invalid JSON")?;
        parse_completion(&payload)
    }
}

/// Extract `choices[0].message.content` from a completion response.
fn parse_completion(payload: &Value) -> Result<String> {
    payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("LLM API response has no choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_first_choice() {
        let payload = json!({
            "id": "chatcmpl-1",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "Cancer is…" } },
                { "index": 1, "message": { "role": "assistant", "content": "ignored" } }
            ]
        });
        assert_eq!(parse_completion(&payload).unwrap(), "Cancer is…");
    }

    #[test]
    fn missing_content_is_an_error() {
        let payload = json!({ "choices": [] });
        assert!(parse_completion(&payload).is_err());
    }

    #[test]
    fn request_body_shape() {
        let messages = vec![ChatMessage::system("be kind"), ChatMessage::user("hi")];
        let body = CompletionRequest {
            model: "llama3-70b-8192",
            messages: &messages,
            temperature: 0.1,
            max_tokens: None,
            stream: false,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "llama3-70b-8192");
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "hi");
        assert_eq!(v["stream"], false);
        assert!(v.get("max_tokens").is_none());
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let config = LlmConfig {
            base_url: "https://api.groq.com/openai/v1/".to_string(),
            ..LlmConfig::default()
        };
        let client = ChatCompletionsClient::new(&config, "key".to_string()).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(client.model_name(), "llama3-70b-8192");
    }

    #[test]
    fn missing_key_is_reported() {
        let config = LlmConfig {
            api_key_env: "CANCERPEDIA_TEST_UNSET_KEY".to_string(),
            ..LlmConfig::default()
        };
        let err = ChatCompletionsClient::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("CANCERPEDIA_TEST_UNSET_KEY"));
    }
}
