//! OpenAI-compatible chat completion client.
//!
//! One client covers both supported providers: OpenAI and OpenRouter expose
//! the same Chat Completions shape and differ only in base URL and token
//! source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ApiProvider, ChatClient, ChatOutcome, ChatParams, TokenUsage};
use crate::error::{Error, Result};
use crate::message::{Message, Role, ToolCall};

/// Retries for transient provider failures (429 and 5xx).
const MAX_RETRIES: u32 = 2;

/// OpenAI-compatible API client.
#[derive(Clone)]
pub struct OpenAiClient {
    http_client: reqwest::Client,
    api_key: Arc<str>,
    base_url: Arc<str>,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiClient {
    /// Create a client for the given provider and token.
    #[must_use]
    pub fn for_provider(provider: ApiProvider, api_key: impl Into<String>) -> Self {
        Self::builder()
            .api_key(api_key)
            .base_url(provider.base_url())
            .build()
    }

    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> OpenAiClientBuilder {
        OpenAiClientBuilder::default()
    }

    /// The configured API base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    fn build_request_body(&self, messages: &[Message], params: &ChatParams) -> Value {
        let mut body = json!({
            "model": params.model,
            "messages": convert_messages(messages),
        });
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if params.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        if !params.tools.is_empty() {
            body["tools"] = Value::Array(params.tools.iter().map(|t| t.to_openai()).collect());
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// Builder for [`OpenAiClient`].
#[derive(Debug, Default)]
pub struct OpenAiClientBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl OpenAiClientBuilder {
    /// Set the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set a custom base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    #[must_use]
    pub fn build(self) -> OpenAiClient {
        let mut http = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }
        OpenAiClient {
            http_client: http.build().unwrap_or_default(),
            api_key: self.api_key.unwrap_or_default().into(),
            base_url: self
                .base_url
                .unwrap_or_else(|| ApiProvider::OpenAi.base_url().to_string())
                .into(),
        }
    }
}

/// Convert transcript messages to the Chat Completions wire shape.
///
/// Assistant tool-call arguments travel as JSON-encoded strings on the wire.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::Assistant if m.has_tool_calls() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .flatten()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.function.name,
                                "arguments": arguments_string(&c.function.arguments),
                            }
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": m.content,
                    "tool_calls": calls,
                })
            }
            Role::Tool => json!({
                "role": "tool",
                "content": m.content,
                "tool_call_id": m.tool_call_id,
            }),
            _ => json!({
                "role": m.role.as_str(),
                "content": m.content,
            }),
        })
        .collect()
}

fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Debug, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn complete(&self, messages: &[Message], params: &ChatParams) -> Result<ChatOutcome> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(messages, params);
        debug!(model = %params.model, messages = messages.len(), "chat completion request");

        let mut attempt = 0u32;
        let response = loop {
            let response = self
                .http_client
                .post(&url)
                .headers(self.auth_headers())
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::Chat(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                break response;
            }

            let retryable =
                status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            let text = response.text().await.unwrap_or_default();
            if retryable && attempt < MAX_RETRIES {
                attempt += 1;
                warn!(%status, attempt, "provider error, retrying");
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                continue;
            }
            return Err(Error::Chat(format!("provider returned {status}: {text}")));
        };

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Chat(format!("invalid provider response: {e}")))?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(Error::Chat("provider returned no choices".to_string()));
        };

        let content = choice.message.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                let arguments = serde_json::from_str(&c.function.arguments)
                    .unwrap_or(Value::String(c.function.arguments));
                ToolCall::new(c.id, c.function.name, arguments)
            })
            .collect();

        let message = if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_calls(content, tool_calls)
        };

        Ok(ChatOutcome {
            message,
            usage: parsed.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let client = OpenAiClient::for_provider(ApiProvider::OpenAi, "sk-secret");
        let debug = format!("{client:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
    }

    #[test]
    fn request_body_carries_params() {
        let client = OpenAiClient::for_provider(ApiProvider::OpenRouter, "sk");
        assert_eq!(client.base_url(), "https://openrouter.ai/api/v1");

        let params = ChatParams {
            model: "gpt-4o".into(),
            temperature: Some(0.2),
            json_mode: true,
            tools: vec![],
        };
        let body = client.build_request_body(&[Message::user("hi")], &params);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tool_history_round_trips_as_strings() {
        let call = ToolCall::new("c1", "grep", json!({"pattern": "x"}));
        let messages = vec![
            Message::assistant_with_calls("", vec![call]),
            Message::tool("1:match", "c1"),
        ];
        let wire = convert_messages(&messages);
        assert_eq!(wire[0]["tool_calls"][0]["function"]["arguments"], r#"{"pattern":"x"}"#);
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "c1");
    }
}
