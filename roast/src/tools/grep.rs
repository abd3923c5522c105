//! Tool for searching file contents with a regular expression.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::tool::{Tool, ToolError, ToolResult};

/// Tool that searches a file for lines matching a pattern.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct GrepTool {
    /// Maximum number of matching lines returned.
    pub max_matches: usize,
}

impl Default for GrepTool {
    fn default() -> Self {
        Self { max_matches: 200 }
    }
}

/// Arguments for a content search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct GrepArgs {
    /// Regular expression to match.
    pub pattern: String,
    /// Path of the file to search.
    pub path: String,
}

impl GrepTool {
    /// Create a new search tool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> String {
        "Search a file for lines matching a regular expression; returns `line_number:line` matches.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Path of the file to search"
                }
            },
            "required": ["pattern", "path"]
        })
    }

    async fn call(&self, args: Value) -> ToolResult<Value> {
        let args: GrepArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::recoverable(format!("invalid arguments: {e}")))?;
        let pattern = Regex::new(&args.pattern)
            .map_err(|e| ToolError::recoverable(format!("invalid pattern: {e}")))?;
        let content = tokio::fs::read_to_string(&args.path)
            .await
            .map_err(|e| ToolError::recoverable(format!("cannot read {}: {e}", args.path)))?;

        let matches: Vec<String> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| pattern.is_match(line))
            .take(self.max_matches)
            .map(|(i, line)| format!("{}:{line}", i + 1))
            .collect();

        Ok(Value::String(if matches.is_empty() {
            "no matches".to_string()
        } else {
            matches.join("\n")
        }))
    }
}
