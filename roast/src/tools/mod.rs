//! Built-in tools.
//!
//! A small default tool set so the `tools:` workflow key resolves out of the
//! box: file read/write, content search, and shell commands. Concrete
//! deployments register their own tools alongside or instead of these.

mod cmd;
mod grep;
mod read_file;
mod write_file;

pub use cmd::{CmdArgs, CmdTool};
pub use grep::{GrepArgs, GrepTool};
pub use read_file::{ReadFileArgs, ReadFileTool};
pub use write_file::{WriteFileArgs, WriteFileTool};

use crate::tool::ToolRegistry;

/// Registry with every built-in tool under its default configuration.
#[must_use]
pub fn builtin_registry() -> ToolRegistry {
    ToolRegistry::builder()
        .register(ReadFileTool::new())
        .register(WriteFileTool::new())
        .register(GrepTool::new())
        .register(CmdTool::new())
        .build()
}
