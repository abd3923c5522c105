//! Tool trait and registry.
//!
//! Tools are named callables the model may invoke during a chat turn. Each
//! tool carries a JSON schema describing its parameters, serialized to the
//! OpenAI function-calling format.
//!
//! Registration is explicit: the executor is constructed with a
//! [`ToolRegistry`]; there is no process-wide state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

/// A type alias for `Result<T, ToolError>`.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Error raised by a tool invocation.
///
/// Recoverable failures are returned to the model as tool messages, letting
/// it retry or adapt. Fatal failures propagate to the scheduler and abort the
/// workflow.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The model can see this failure and react to it.
    #[error("{0}")]
    Recoverable(String),
    /// The workflow must stop (e.g. a write outside the allowed path).
    #[error("{0}")]
    Fatal(String),
}

impl ToolError {
    /// Build a recoverable error.
    #[must_use]
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Recoverable(message.into())
    }

    /// Build a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Whether this failure aborts the workflow.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Definition of a tool for LLM function calling.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    /// Tool name (snake_case).
    pub name: String,
    /// What the tool does; helps the model decide when to call it.
    pub description: String,
    /// JSON schema for the parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Serialize to the OpenAI `tools` array element shape.
    #[must_use]
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Human/model-readable description.
    fn description(&self) -> String;

    /// JSON schema for the call arguments.
    fn parameters(&self) -> Value;

    /// Tools are assumed non-reentrant unless declared otherwise; a serial
    /// tool's calls are executed one at a time even inside parallel groups.
    fn serial(&self) -> bool {
        false
    }

    /// Invoke the tool.
    async fn call(&self, args: Value) -> ToolResult<Value>;

    /// The definition offered to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description(),
            parameters: self.parameters(),
        }
    }
}

/// A set of tools keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry builder.
    #[must_use]
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Add a tool, replacing any previous tool of the same name.
    pub fn add(&mut self, tool: impl Tool + 'static) {
        self.add_arc(Arc::new(tool));
    }

    /// Add an already-shared tool.
    pub fn add_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool of this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions for the named tools, in the given order.
    ///
    /// Unknown names are a configuration error surfaced by workflow
    /// validation; here they are skipped.
    #[must_use]
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.definition())
            .collect()
    }
}

/// Builder for [`ToolRegistry`].
#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl fmt::Debug for ToolRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistryBuilder")
            .field("registry", &self.registry)
            .finish()
    }
}

impl ToolRegistryBuilder {
    /// Register a tool.
    #[must_use]
    pub fn register(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.add(tool);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}
