//! OpenAI chat-completions provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ChatMessage, ModelProvider, ProviderResponse, TokenUsage};

/// Default endpoint for OpenAI chat completions.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Provider that talks to the OpenAI-compatible chat completions API.
pub struct OpenAIProvider {
    api_key: String,
    endpoint: String,
    client: Client,
    /// Model name sent in the request body (e.g. "gpt-4o-mini").
    model: String,
    /// Optional `max_tokens` cap for every request.
    max_tokens: Option<u32>,
}

impl OpenAIProvider {
    /// Create a provider with explicit configuration.
    ///
    /// `timeout` bounds each request end to end; a timed-out request
    /// surfaces as an error like any other transport failure.
    pub fn with_config(
        api_key: String,
        endpoint: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key,
            endpoint,
            client,
            model,
            max_tokens: None,
        })
    }

    /// Cap the completion length of every request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": super::serialize_messages(messages),
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<Value, anyhow::Error> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API returned {status}: {text}");
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    /// Send chat messages to the completions endpoint and return the first
    /// choice's content.
    async fn send_chat(&self, messages: &[ChatMessage]) -> Result<String, anyhow::Error> {
        let json = self.post(&self.request_body(messages)).await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(content)
    }

    /// Send chat messages with an array of tool definitions.
    ///
    /// Returns [`ProviderResponse::ToolCalls`] when the model wants to
    /// invoke tools, or [`ProviderResponse::Final`] for a normal reply.
    async fn send_chat_with_functions(
        &self,
        messages: &[ChatMessage],
        functions: &[Value],
    ) -> Result<(ProviderResponse, Option<TokenUsage>), anyhow::Error> {
        let mut body = self.request_body(messages);
        if !functions.is_empty() {
            body["tools"] = Value::Array(functions.to_vec());
            body["tool_choice"] = json!("auto");
        }

        let json = self.post(&body).await?;
        let usage = super::parse_token_usage(&json);

        if let Some(pr) = super::parse_tool_calls(&json) {
            return Ok((pr, usage));
        }

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok((ProviderResponse::Final(content), usage))
    }
}
