use async_stream::try_stream;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Response parsing error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Generation was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub top_p: f32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: Some(800),
            top_p: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-tagged conversation message. The role is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Incremental text deltas from one streaming completion, in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// Streaming chat-completion capability used by the generation coordinator.
#[async_trait::async_trait]
pub trait ChatStreamer: Send + Sync {
    async fn stream_chat(
        &self,
        messages: Vec<Message>,
        config: &LLMConfig,
    ) -> Result<TokenStream, LLMError>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (OpenAI, LiteLLM proxies, ...)
pub struct OpenAiLLM {
    client: Client,
    api_key: String,
    base_url: String,
    config: LLMConfig,
}

impl OpenAiLLM {
    pub fn new(api_key: String, base_url: impl Into<String>) -> Result<Self, LLMError> {
        Self::with_config(api_key, base_url, LLMConfig::default())
    }

    pub fn with_config(
        api_key: String,
        base_url: impl Into<String>,
        config: LLMConfig,
    ) -> Result<Self, LLMError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(Duration::from_secs(60)) // generation can pause between chunks
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(LLMError::Config("Base URL cannot be empty".to_string()));
        }

        Ok(Self {
            client,
            api_key,
            base_url,
            config,
        })
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    fn build_payload(messages: &[Message], config: &LLMConfig) -> Value {
        let messages_json: Vec<Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.as_str(),
                    "content": msg.content
                })
            })
            .collect();

        let mut payload = json!({
            "model": config.model,
            "messages": messages_json,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": true
        });

        if let Some(max_tokens) = config.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }

        payload
    }
}

#[async_trait::async_trait]
impl ChatStreamer for OpenAiLLM {
    async fn stream_chat(
        &self,
        messages: Vec<Message>,
        config: &LLMConfig,
    ) -> Result<TokenStream, LLMError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = Self::build_payload(&messages, config);

        log::debug!(
            "LLM: Opening stream to {} ({} messages, model {})",
            url,
            messages.len(),
            config.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LLMError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(delta_stream(response.bytes_stream()))
    }
}

/// Turn a chat-completion SSE body into content deltas, ending at `[DONE]`
pub fn delta_stream<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let mut events = Box::pin(body.eventsource());
    Box::pin(try_stream! {
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LLMError::Stream(e.to_string()))?;
            if event.data == "[DONE]" {
                break;
            }
            if event.data.is_empty() {
                continue;
            }
            if let Some(delta) = parse_delta(&event.data)? {
                yield delta;
            }
        }
    })
}

/// Extract the content delta from one streamed chunk, if it carries any text
pub fn parse_delta(data: &str) -> Result<Option<String>, LLMError> {
    let json: Value = serde_json::from_str(data)
        .map_err(|e| LLMError::ParseError(format!("Invalid JSON chunk: {}", e)))?;

    if let Some(error) = json.get("error") {
        let message = error["message"]
            .as_str()
            .unwrap_or("unknown stream error")
            .to_string();
        return Err(LLMError::Stream(message));
    }

    let content = json["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(|content| content.to_string());

    Ok(content)
}
