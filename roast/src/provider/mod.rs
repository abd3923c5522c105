//! Chat provider abstraction.
//!
//! The engine talks to language models through the [`ChatClient`] trait: one
//! blocking completion call over the transcript plus step-scoped parameters.
//! Two implementations ship with the crate: an OpenAI-compatible HTTP client
//! (covering both the `openai` and `openrouter` providers) and a scripted
//! mock for tests.

mod mock;
mod openai;

pub use mock::{MockClient, MockReply, RecordedCall};
pub use openai::{OpenAiClient, OpenAiClientBuilder};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::tool::ToolDefinition;

/// Which chat completion API to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiProvider {
    /// The OpenAI API.
    #[default]
    OpenAi,
    /// The OpenRouter API (OpenAI-compatible).
    OpenRouter,
}

impl ApiProvider {
    /// Default API base URL for this provider.
    #[must_use]
    pub const fn base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Environment variable consulted when no `api_token` is configured.
    #[must_use]
    pub const fn token_env_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// String form used in workflow documents.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Resolve the API token: the configured value, else the provider's
    /// environment variable.
    pub fn resolve_token(&self, configured: Option<&str>) -> Result<String> {
        if let Some(token) = configured {
            if !token.trim().is_empty() {
                return Ok(token.trim().to_string());
            }
        }
        std::env::var(self.token_env_var()).map_err(|_| {
            Error::Config(format!(
                "no api_token configured and {} is not set",
                self.token_env_var()
            ))
        })
    }
}

/// Token usage reported by a completion call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub input_tokens: u32,
    /// Tokens in the completion.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Total token count.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Step-scoped parameters for one completion call.
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature, if overridden.
    pub temperature: Option<f32>,
    /// Request a JSON-object response.
    pub json_mode: bool,
    /// Tools offered to the model (empty for raw prompts).
    pub tools: Vec<ToolDefinition>,
}

/// Result of one completion call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// The assistant message (content and/or tool calls).
    pub message: Message,
    /// Token usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

/// A chat completion backend.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Complete the conversation, returning the assistant message.
    async fn complete(&self, messages: &[Message], params: &ChatParams) -> Result<ChatOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_serde_forms() {
        let p: ApiProvider = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(p, ApiProvider::OpenRouter);
        assert_eq!(p.as_str(), "openrouter");
        assert_eq!(ApiProvider::default(), ApiProvider::OpenAi);
    }

    #[test]
    fn token_resolution_prefers_configured_value() {
        let token = ApiProvider::OpenAi.resolve_token(Some("sk-test")).unwrap();
        assert_eq!(token, "sk-test");
    }

    #[test]
    fn token_resolution_falls_back_to_env() {
        unsafe { std::env::set_var("OPENROUTER_API_KEY", "sk-or-env") };
        let token = ApiProvider::OpenRouter.resolve_token(None).unwrap();
        assert_eq!(token, "sk-or-env");
        unsafe { std::env::remove_var("OPENROUTER_API_KEY") };
    }
}
