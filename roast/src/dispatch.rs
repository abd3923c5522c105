//! Tool-call dispatch.
//!
//! Resolves tool calls from model responses, runs them, and turns the
//! outcome into tool messages. Successful results are cached per workflow
//! run, keyed by `(tool_name, normalized_parameters)`; concurrent dispatches
//! for the same key collapse to one execution whose result is shared
//! (single-flight). Tools declaring `serial` are executed one call at a
//! time.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::tool::{ToolError, ToolRegistry};

/// Outcome of one underlying tool invocation, before message formatting.
enum Invocation {
    Ok(String),
    Recoverable(String),
    Fatal(String),
    Cancelled,
}

/// Per-run tool dispatcher.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    cache: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
    serial_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}

impl ToolDispatcher {
    /// Create a dispatcher over the given registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
            serial_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve and run one tool call, producing the tool message to append.
    ///
    /// Recoverable failures are reported to the model inside the message;
    /// fatal failures and cancellation surface as errors. `use_cache: false`
    /// bypasses the per-run cache for steps that opt out.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        use_cache: bool,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let name = call.name().to_string();
        let args = call.arguments();

        let invocation = if use_cache {
            let key = format!("{name}\u{0}{}", normalize_params(&args));
            let cell = {
                let mut cache = self.cache.lock().await;
                Arc::clone(cache.entry(key).or_default())
            };
            if let Some(content) = cell.get() {
                debug!(tool = %name, "tool cache hit");
                Invocation::Ok(content.clone())
            } else {
                let result = cell
                    .get_or_try_init(|| self.invoke(&name, args, cancel))
                    .await;
                match result {
                    Ok(content) => Invocation::Ok(content.clone()),
                    Err(invocation) => invocation,
                }
            }
        } else {
            match self.invoke(&name, args, cancel).await {
                Ok(content) => Invocation::Ok(content),
                Err(invocation) => invocation,
            }
        };

        match invocation {
            Invocation::Ok(content) => Ok(Message::tool(content, &call.id)),
            Invocation::Recoverable(message) => Ok(Message::tool(
                format!("Tool '{name}' failed: {message}"),
                &call.id,
            )),
            Invocation::Fatal(message) => Err(Error::Tool {
                tool: name,
                message,
            }),
            Invocation::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Run the underlying tool once. Used as the single-flight initializer:
    /// only `Ok` is cached.
    async fn invoke(
        &self,
        name: &str,
        args: Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, Invocation> {
        if cancel.is_cancelled() {
            return Err(Invocation::Cancelled);
        }
        let Some(tool) = self.registry.get(name) else {
            return Err(Invocation::Recoverable(format!("unknown tool '{name}'")));
        };

        let _serial_guard = if tool.serial() {
            let lock = {
                let mut locks = self.serial_locks.lock().await;
                Arc::clone(locks.entry(name.to_string()).or_default())
            };
            Some(lock.lock_owned().await)
        } else {
            None
        };

        debug!(tool = %name, "dispatching tool call");
        let outcome = tokio::select! {
            outcome = tool.call(args) => outcome,
            () = cancel.cancelled() => return Err(Invocation::Cancelled),
        };

        match outcome {
            Ok(Value::String(s)) => Ok(s),
            Ok(value) => serde_json::to_string(&value)
                .map_err(|e| Invocation::Fatal(format!("unserializable tool result: {e}"))),
            Err(ToolError::Recoverable(message)) => Err(Invocation::Recoverable(message)),
            Err(ToolError::Fatal(message)) => Err(Invocation::Fatal(message)),
        }
    }
}

/// Canonical cache key text for tool parameters.
///
/// Object keys are sorted recursively and integral floats collapse to
/// integers, so `{"b":1.0,"a":2}` and `{"a":2,"b":1}` normalize equal.
#[must_use]
pub fn normalize_params(value: &Value) -> String {
    serde_json::to_string(&normalize_value(value)).unwrap_or_default()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| k.as_str());
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), normalize_value(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
                #[allow(clippy::cast_possible_truncation)]
                Value::from(f as i64)
            }
            _ => value.clone(),
        },
        other => other.clone(),
    }
}
