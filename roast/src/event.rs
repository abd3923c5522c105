//! Instrumentation events emitted during workflow execution.
//!
//! The executor reports progress through an [`EventSink`]. The default sink
//! logs through `tracing`; tests install a [`CollectorSink`] to assert on the
//! emitted sequence.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

/// An instrumentation event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    /// A step is about to execute.
    StepStarted {
        /// Step name.
        name: String,
        /// Zero-based position in the enclosing sequence.
        index: usize,
    },
    /// A step completed and its result was recorded.
    StepFinished {
        /// Step name.
        name: String,
        /// Zero-based position in the enclosing sequence.
        index: usize,
        /// Wall-clock duration.
        duration_ms: u64,
    },
    /// A step failed fatally.
    StepFailed {
        /// Step name.
        name: String,
        /// Rendered error.
        error: String,
    },
    /// A step exceeded its configured timeout.
    StepTimeout {
        /// Step name.
        name: String,
        /// The configured limit.
        seconds: u64,
    },
    /// A `repeat` block reached `max_iterations` with `until` still false.
    RepeatExhausted {
        /// Step name.
        name: String,
        /// Number of iterations executed.
        iterations: u64,
    },
    /// Two parallel siblings wrote the same output key; the last writer won.
    ParallelOutputConflict {
        /// The contested output key.
        key: String,
    },
}

impl Event {
    /// Dotted event kind, stable across releases.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StepStarted { .. } => "step.started",
            Self::StepFinished { .. } => "step.finished",
            Self::StepFailed { .. } => "step.failed",
            Self::StepTimeout { .. } => "step.timeout",
            Self::RepeatExhausted { .. } => "repeat.exhausted",
            Self::ParallelOutputConflict { .. } => "parallel.output_conflict",
        }
    }
}

/// Receiver for instrumentation events.
pub trait EventSink: Send + Sync {
    /// Handle one event. Must not block.
    fn emit(&self, event: &Event);
}

/// Default sink: structured `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::StepStarted { name, index } => {
                info!(kind = event.kind(), step = %name, index, "step started");
            }
            Event::StepFinished {
                name,
                index,
                duration_ms,
            } => {
                info!(kind = event.kind(), step = %name, index, duration_ms, "step finished");
            }
            Event::StepFailed { name, error } => {
                warn!(kind = event.kind(), step = %name, error = %error, "step failed");
            }
            Event::StepTimeout { name, seconds } => {
                warn!(kind = event.kind(), step = %name, seconds, "step timed out");
            }
            Event::RepeatExhausted { name, iterations } => {
                warn!(kind = event.kind(), step = %name, iterations, "repeat exhausted");
            }
            Event::ParallelOutputConflict { key } => {
                warn!(kind = event.kind(), key = %key, "parallel output conflict");
            }
        }
    }
}

/// Sink that retains every event, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CollectorSink {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Kinds of the events emitted so far, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::kind).collect()
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
