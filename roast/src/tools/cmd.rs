//! Tool for running shell commands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::shell;
use crate::tool::{Tool, ToolError, ToolResult};

/// Tool that runs a shell command and returns its output.
///
/// Declared serial: concurrent model-driven commands in the same working
/// directory interleave badly, so calls are executed one at a time.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct CmdTool;

/// Arguments for running a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CmdArgs {
    /// Command line to run through the system shell.
    pub command: String,
}

impl CmdTool {
    /// Create a new command tool.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for CmdTool {
    fn name(&self) -> &str {
        "cmd"
    }

    fn description(&self) -> String {
        "Run a shell command and return its stdout, stderr, and exit status.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line to run"
                }
            },
            "required": ["command"]
        })
    }

    fn serial(&self) -> bool {
        true
    }

    async fn call(&self, args: Value) -> ToolResult<Value> {
        let args: CmdArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::recoverable(format!("invalid arguments: {e}")))?;
        let outcome = shell::run(&args.command, &CancellationToken::new())
            .await
            .map_err(|e| ToolError::recoverable(e.to_string()))?;
        Ok(json!({
            "stdout": outcome.stdout,
            "stderr": outcome.stderr,
            "status": outcome.status,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_output_and_status() {
        let tool = CmdTool::new();
        let out = tool.call(json!({"command": "printf hi; exit 7"})).await.unwrap();
        assert_eq!(out["stdout"], "hi");
        assert_eq!(out["status"], 7);
    }

    #[test]
    fn declared_serial() {
        assert!(CmdTool::new().serial());
    }
}
