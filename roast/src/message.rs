//! Transcript message types.
//!
//! The conversation transcript is an ordered sequence of messages in chat
//! completion shape. It is append-only within a single workflow run; replays
//! reconstruct the prefix up to the resumed step.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message (rendered step prompt).
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool result message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Function call information in a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Name of the function to call.
    pub name: String,
    /// Arguments to pass, as a JSON object (or a JSON-encoded string as
    /// returned by some providers).
    pub arguments: Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for the tool call.
    pub id: String,
    /// Type of the tool call (always "function").
    #[serde(rename = "type")]
    pub call_type: String,
    /// The function to call.
    pub function: ToolCallFunction,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments,
            },
        }
    }

    /// Name of the called function.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// The call arguments as a JSON object.
    ///
    /// Providers sometimes deliver arguments as a JSON-encoded string; this
    /// normalizes that case.
    #[must_use]
    pub fn arguments(&self) -> Value {
        match &self.function.arguments {
            Value::String(s) => {
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
            }
            other => other.clone(),
        }
    }
}

/// One message in the conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,
    /// Message text. For assistant messages with tool calls this may be
    /// empty.
    #[serde(default)]
    pub content: String,
    /// For tool messages: the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For assistant messages: tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create an assistant message without tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls.
    #[must_use]
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    /// Create a tool result message answering `call_id`.
    #[must_use]
    pub fn tool(content: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Whether this message carries tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = Message::tool("done", "call_1");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn string_arguments_are_parsed() {
        let call = ToolCall::new("id1", "grep", Value::String(r#"{"pattern":"x"}"#.into()));
        assert_eq!(call.arguments()["pattern"], "x");
    }

    #[test]
    fn has_tool_calls_ignores_empty_vec() {
        let msg = Message::assistant_with_calls("", vec![]);
        assert!(!msg.has_tool_calls());
        assert!(Message::assistant("hi").tool_calls.is_none());
    }
}
