//! Tool for writing file contents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::tool::{Tool, ToolError, ToolResult};

/// Tool that writes text to a file, creating parent directories as needed.
///
/// When `restrict_path` is set, writes outside that root are a fatal error:
/// the model must not be able to talk its way past the boundary.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct WriteFileTool {
    /// Root directory writes are confined to, if any.
    pub restrict_path: Option<PathBuf>,
}

/// Arguments for writing a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct WriteFileArgs {
    /// Path of the file to write.
    pub path: String,
    /// Content to write.
    pub content: String,
}

impl WriteFileTool {
    /// Create an unrestricted writer tool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Confine writes to the given root.
    #[must_use]
    pub fn with_restrict_path(mut self, root: impl Into<PathBuf>) -> Self {
        self.restrict_path = Some(root.into());
        self
    }

    fn check_restriction(&self, path: &Path) -> ToolResult<()> {
        let Some(root) = &self.restrict_path else {
            return Ok(());
        };
        // Normalize lexically; the target may not exist yet.
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| ToolError::fatal(format!("cannot resolve working directory: {e}")))?
                .join(path)
        };
        let normalized = normalize(&absolute);
        let root = normalize(&if root.is_absolute() {
            root.clone()
        } else {
            std::env::current_dir()
                .map_err(|e| ToolError::fatal(format!("cannot resolve working directory: {e}")))?
                .join(root)
        });
        if normalized.starts_with(&root) {
            Ok(())
        } else {
            Err(ToolError::fatal(format!(
                "write to {} is outside the allowed path {}",
                normalized.display(),
                root.display()
            )))
        }
    }
}

/// Remove `.` and resolve `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> String {
        "Write text content to a file, creating parent directories if needed.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Text content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn call(&self, args: Value) -> ToolResult<Value> {
        let args: WriteFileArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::recoverable(format!("invalid arguments: {e}")))?;
        let path = Path::new(&args.path);
        self.check_restriction(path)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::recoverable(format!("cannot create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, &args.content)
            .await
            .map_err(|e| ToolError::recoverable(format!("cannot write {}: {e}", args.path)))?;
        Ok(Value::String(format!(
            "wrote {} bytes to {}",
            args.content.len(),
            args.path
        )))
    }
}
