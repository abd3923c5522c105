//! Tool for reading file contents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::tool::{Tool, ToolError, ToolResult};

/// Tool that reads a file and returns its content as text.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ReadFileTool {
    /// Maximum output length in characters; longer files are truncated.
    pub max_output_length: usize,
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self {
            max_output_length: 100_000,
        }
    }
}

/// Arguments for reading a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ReadFileArgs {
    /// Path of the file to read.
    pub path: String,
}

impl ReadFileTool {
    /// Create a new file reader tool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> String {
        "Read the contents of a file at the given path.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn call(&self, args: Value) -> ToolResult<Value> {
        let args: ReadFileArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::recoverable(format!("invalid arguments: {e}")))?;
        let mut content = tokio::fs::read_to_string(&args.path)
            .await
            .map_err(|e| ToolError::recoverable(format!("cannot read {}: {e}", args.path)))?;
        if content.len() > self.max_output_length {
            let mut cut = self.max_output_length;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n…(truncated)");
        }
        Ok(Value::String(content))
    }
}
