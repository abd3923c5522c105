//! Convenient re-exports for embedding the engine.

pub use crate::context::{ContextStore, RunScope, Transcript};
pub use crate::dispatch::ToolDispatcher;
pub use crate::driver::{ChatDriver, DEFAULT_MAX_TOOL_LOOPS, TurnOptions};
pub use crate::error::{Error, Result};
pub use crate::event::{CollectorSink, Event, EventSink, TracingSink};
pub use crate::executor::{Executor, ExecutorBuilder};
pub use crate::message::{Message, Role, ToolCall};
pub use crate::provider::{
    ApiProvider, ChatClient, ChatOutcome, ChatParams, MockClient, MockReply, OpenAiClient,
    TokenUsage,
};
pub use crate::session::{ReplayState, SessionRecorder, SessionMeta, StepRecord};
pub use crate::step::{
    ExprRenderer, FnStep, OutputRenderer, ProceduralStep, StepContext, StepRegistry, StepResult,
};
pub use crate::tool::{Tool, ToolDefinition, ToolError, ToolRegistry, ToolResult};
pub use crate::tools::builtin_registry;
pub use crate::workflow::{Step, StepKind, StepOverrides, Workflow, WorkflowDoc};
