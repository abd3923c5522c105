//! The chat driver: one prompt-response turn with a bounded tool-call loop.
//!
//! A turn appends the rendered user message and calls the provider. While
//! the assistant keeps requesting tools, the driver dispatches each call,
//! appends the tool messages, and completes again. The turn ends when a
//! response carries no tool calls; its content is the step's raw response.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::ContextStore;
use crate::dispatch::ToolDispatcher;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::provider::{ChatClient, ChatParams};

/// Default bound on tool-call round trips within one turn.
pub const DEFAULT_MAX_TOOL_LOOPS: usize = 10;

/// Options for one prompt turn.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    /// Completion parameters (model, temperature, JSON mode, offered tools).
    pub params: ChatParams,
    /// Bound on tool-call round trips; prevents runaway models.
    pub max_tool_loops: usize,
    /// Whether tool results may come from the per-run cache.
    pub use_cache: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            params: ChatParams::default(),
            max_tool_loops: DEFAULT_MAX_TOOL_LOOPS,
            use_cache: true,
        }
    }
}

/// Per-step driver over a chat client and a tool dispatcher.
#[derive(Clone, Copy)]
pub struct ChatDriver<'a> {
    client: &'a dyn ChatClient,
    dispatcher: &'a ToolDispatcher,
}

impl std::fmt::Debug for ChatDriver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatDriver")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl<'a> ChatDriver<'a> {
    /// Create a driver.
    #[must_use]
    pub const fn new(client: &'a dyn ChatClient, dispatcher: &'a ToolDispatcher) -> Self {
        Self { client, dispatcher }
    }

    /// Execute one prompt turn and return the final assistant content.
    pub async fn prompt_turn(
        &self,
        ctx: &ContextStore,
        user_message: String,
        options: &TurnOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        ctx.append(Message::user(user_message));

        for round in 0..=options.max_tool_loops {
            let transcript = ctx.transcript();
            let outcome = tokio::select! {
                outcome = self.client.complete(&transcript, &options.params) => outcome?,
                () = cancel.cancelled() => return Err(Error::Cancelled),
            };

            let message = outcome.message;
            ctx.append(message.clone());

            let Some(calls) = message.tool_calls.filter(|c| !c.is_empty()) else {
                return Ok(message.content);
            };

            debug!(round, calls = calls.len(), "dispatching tool calls");
            for call in &calls {
                let tool_message = self
                    .dispatcher
                    .dispatch(call, options.use_cache, cancel)
                    .await?;
                ctx.append(tool_message);
            }
        }

        Err(Error::Chat(format!(
            "model exceeded {} tool-call rounds",
            options.max_tool_loops
        )))
    }
}
