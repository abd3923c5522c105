//! Error types for the workflow engine.
//!
//! Every failure surfaced by the engine is one of the kinds below. Fatal
//! errors stop the workflow at the current step boundary; recoverable tool
//! failures never appear here because they are fed back to the model as tool
//! messages (see [`crate::dispatch`]).

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for workflow operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid workflow document; fatal before execution.
    #[error("ConfigError: {0}")]
    Config(String),

    /// A `{{…}}` expression failed to parse or evaluate.
    #[error("ExpressionError in `{expr}`: {message}")]
    Expression {
        /// The offending expression text.
        expr: String,
        /// What went wrong.
        message: String,
    },

    /// A `$(…)` command exited non-zero while `exit_on_error` was in effect.
    #[error("ShellFailure: `{command}` exited with status {status}")]
    Shell {
        /// The command line that was run.
        command: String,
        /// Its exit status.
        status: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// A tool failed fatally (e.g. a write outside the allowed path).
    #[error("ToolError in '{tool}': {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// The underlying error message.
        message: String,
    },

    /// The chat provider returned an error or exceeded retries.
    #[error("ChatError: {0}")]
    Chat(String),

    /// A persisted session prefix is incompatible with the current workflow.
    #[error("ReplayMismatch: {0}")]
    ReplayMismatch(String),

    /// The run was cancelled by a signal or an outer timeout.
    #[error("workflow cancelled")]
    Cancelled,

    /// A step exceeded its configured timeout.
    #[error("step '{step}' timed out after {seconds}s")]
    Timeout {
        /// Name of the step.
        step: String,
        /// The configured limit.
        seconds: u64,
    },

    /// A step failed; wraps the cause so the failure names the step.
    #[error("step '{step}' failed: {source}")]
    Step {
        /// Name of the step.
        step: String,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },

    /// Engine invariant violation (e.g. a panicked parallel worker).
    #[error("internal error: {0}")]
    Internal(String),

    /// Filesystem error (session persistence, prompt files).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Workflow document parse error.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Wrap an error so the user-visible failure names the step.
    ///
    /// Cancellation is not wrapped: it is a run-level condition, not a step
    /// failure.
    #[must_use]
    pub fn in_step(self, step: impl Into<String>) -> Self {
        match self {
            Self::Cancelled | Self::Step { .. } => self,
            other => Self::Step {
                step: step.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, unwrapping any step attribution.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error (or its root cause) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled)
    }

    /// Whether this error is a configuration problem, detected before any
    /// step ran.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self.root_cause(), Self::Config(_) | Self::Yaml(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_step_names_the_step() {
        let err = Error::Chat("boom".into()).in_step("analyze");
        assert_eq!(
            err.to_string(),
            "step 'analyze' failed: ChatError: boom"
        );
    }

    #[test]
    fn in_step_does_not_wrap_cancellation() {
        let err = Error::Cancelled.in_step("analyze");
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn root_cause_unwraps_nested_attribution() {
        let err = Error::Shell {
            command: "false".into(),
            status: 1,
            stderr: String::new(),
        }
        .in_step("inner");
        assert!(matches!(err.root_cause(), Error::Shell { status: 1, .. }));
        assert!(!err.is_cancelled());
    }
}
