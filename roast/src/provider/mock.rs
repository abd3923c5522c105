//! Scripted chat client for tests.
//!
//! Returns predefined replies in sequence, cycling when exhausted, and
//! records every request so tests can assert on the messages and parameters
//! the engine actually sent.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{ChatClient, ChatOutcome, ChatParams};
use crate::error::Result;
use crate::message::{Message, ToolCall};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A plain assistant message.
    Text(String),
    /// An assistant message requesting tool calls.
    ToolCalls(Vec<ToolCall>),
}

/// One recorded completion request.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// The transcript as sent.
    pub messages: Vec<Message>,
    /// The model requested.
    pub model: String,
    /// Whether JSON mode was requested.
    pub json_mode: bool,
    /// Names of the tools offered.
    pub tool_names: Vec<String>,
}

/// A scripted mock chat client.
#[derive(Debug, Default)]
pub struct MockClient {
    replies: Vec<MockReply>,
    cursor: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockClient {
    /// Create a client that answers with the given replies, cycling.
    #[must_use]
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Convenience constructor from plain text replies.
    #[must_use]
    pub fn with_texts(texts: Vec<&str>) -> Self {
        Self::new(texts.into_iter().map(|t| MockReply::Text(t.to_string())).collect())
    }

    /// Snapshot of the requests received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of completion calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// The user message content of each recorded request, in order.
    #[must_use]
    pub fn user_messages(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| {
                c.messages
                    .iter()
                    .rev()
                    .find(|m| m.role == crate::message::Role::User)
                    .map(|m| m.content.clone())
            })
            .collect()
    }
}

#[async_trait]
impl ChatClient for MockClient {
    async fn complete(&self, messages: &[Message], params: &ChatParams) -> Result<ChatOutcome> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                model: params.model.clone(),
                json_mode: params.json_mode,
                tool_names: params.tools.iter().map(|t| t.name.clone()).collect(),
            });
        }

        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let message = match self.replies.get(index % self.replies.len().max(1)) {
            Some(MockReply::Text(text)) => Message::assistant(text.clone()),
            Some(MockReply::ToolCalls(calls)) => {
                Message::assistant_with_calls("", calls.clone())
            }
            None => Message::assistant("No response"),
        };

        Ok(ChatOutcome {
            message,
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn cycles_replies_and_records_calls() {
        let client = MockClient::with_texts(vec!["first", "second"]);
        let params = ChatParams {
            model: "m1".into(),
            ..ChatParams::default()
        };

        let r1 = client.complete(&[Message::user("a")], &params).await.unwrap();
        let r2 = client.complete(&[Message::user("b")], &params).await.unwrap();
        let r3 = client.complete(&[Message::user("c")], &params).await.unwrap();

        assert_eq!(r1.message.content, "first");
        assert_eq!(r2.message.content, "second");
        assert_eq!(r3.message.content, "first");
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.user_messages(), vec!["a", "b", "c"]);
        assert_eq!(client.calls()[0].model, "m1");
    }

    #[tokio::test]
    async fn tool_call_replies() {
        let client = MockClient::new(vec![
            MockReply::ToolCalls(vec![ToolCall::new("c1", "grep", json!({"pattern": "x"}))]),
            MockReply::Text("done".into()),
        ]);
        let outcome = client
            .complete(&[Message::user("go")], &ChatParams::default())
            .await
            .unwrap();
        assert!(outcome.message.has_tool_calls());
    }
}
