//! Shared execution context: the Output Map and the conversation transcript.
//!
//! Every step handler receives the same context. Loops create scopes by
//! layering, not by cloning: a child layer holds its own output writes and
//! loop bindings, and lookups fall through to the parent chain. Committing a
//! layer copies its writes one level up, which is how an iteration's outputs
//! become visible to the next iteration while still being discarded when the
//! whole loop pops.
//!
//! The transcript is append-only. Parallel siblings run against a buffered
//! handle: a snapshot of the shared transcript taken at group entry plus a
//! private append buffer, flushed as one contiguous block when the sibling
//! finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::event::{Event, EventSink, TracingSink};
use crate::expr::Scope;
use crate::message::Message;

// ---------------------------------------------------------------------------
// Output layers
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Layer {
    bindings: HashMap<String, Value>,
    values: Mutex<HashMap<String, Value>>,
    parent: Option<Arc<Layer>>,
}

impl Layer {
    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.bindings.get(name) {
            return Some(v.clone());
        }
        if let Ok(values) = self.values.lock()
            && let Some(v) = values.get(name)
        {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    fn binding(&self, name: &str) -> Option<Value> {
        self.bindings
            .get(name)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|p| p.binding(name)))
    }

    /// Merge output writes bottom-up so child layers shadow parents.
    fn collect_outputs(&self, into: &mut Map<String, Value>) {
        if let Some(parent) = &self.parent {
            parent.collect_outputs(into);
        }
        if let Ok(values) = self.values.lock() {
            for (k, v) in values.iter() {
                into.insert(k.clone(), v.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum TranscriptMode {
    /// Directly appends to the run transcript.
    Shared,
    /// Parallel sibling: snapshot base plus a private buffer.
    Buffered {
        base: Vec<Message>,
        appended: Mutex<Vec<Message>>,
    },
}

/// Handle onto the run transcript.
#[derive(Debug, Clone)]
pub struct Transcript {
    shared: Arc<Mutex<Vec<Message>>>,
    mode: Arc<TranscriptMode>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Create an empty shared transcript.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Vec::new())),
            mode: Arc::new(TranscriptMode::Shared),
        }
    }

    /// Append one message.
    pub fn append(&self, message: Message) {
        match &*self.mode {
            TranscriptMode::Shared => {
                if let Ok(mut shared) = self.shared.lock() {
                    shared.push(message);
                }
            }
            TranscriptMode::Buffered { appended, .. } => {
                if let Ok(mut buffer) = appended.lock() {
                    buffer.push(message);
                }
            }
        }
    }

    /// The messages visible to this handle, in order.
    #[must_use]
    pub fn view(&self) -> Vec<Message> {
        match &*self.mode {
            TranscriptMode::Shared => self.shared.lock().map(|s| s.clone()).unwrap_or_default(),
            TranscriptMode::Buffered { base, appended } => {
                let mut view = base.clone();
                if let Ok(buffer) = appended.lock() {
                    view.extend(buffer.iter().cloned());
                }
                view
            }
        }
    }

    /// Fork a buffered handle whose base is a snapshot of the shared
    /// transcript taken now.
    #[must_use]
    pub fn fork(&self) -> Self {
        let base = self.shared.lock().map(|s| s.clone()).unwrap_or_default();
        Self {
            shared: Arc::clone(&self.shared),
            mode: Arc::new(TranscriptMode::Buffered {
                base,
                appended: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Flush a buffered handle's private messages into the shared transcript
    /// as one contiguous block. No-op on shared handles.
    pub fn join(&self) {
        if let TranscriptMode::Buffered { appended, .. } = &*self.mode {
            let drained: Vec<Message> = appended
                .lock()
                .map(|mut buffer| buffer.drain(..).collect())
                .unwrap_or_default();
            if let Ok(mut shared) = self.shared.lock() {
                shared.extend(drained);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Context store
// ---------------------------------------------------------------------------

/// Thread-safe Output Map plus the shared transcript and the event sink.
#[derive(Clone)]
pub struct ContextStore {
    layer: Arc<Layer>,
    transcript: Transcript,
    events: Arc<dyn EventSink>,
    track_conflicts: bool,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("outputs", &self.outputs())
            .finish()
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl ContextStore {
    /// Create a root context with the given event sink.
    #[must_use]
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            layer: Arc::new(Layer::default()),
            transcript: Transcript::new(),
            events,
            track_conflicts: false,
        }
    }

    /// Record a step result under `name` in the current layer.
    ///
    /// Within a parallel group, replacing a key another sibling already wrote
    /// emits `parallel.output_conflict`; the last writer wins.
    pub fn record(&self, name: &str, value: Value) {
        let replaced = self
            .layer
            .values
            .lock()
            .map(|mut values| values.insert(name.to_string(), value).is_some())
            .unwrap_or(false);
        if replaced && self.track_conflicts {
            self.emit(&Event::ParallelOutputConflict {
                key: name.to_string(),
            });
        }
    }

    /// Look up a value: loop bindings shadow output writes, child layers
    /// shadow parents.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.layer.lookup(name)
    }

    /// Look up a loop binding only.
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<Value> {
        self.layer.binding(name)
    }

    /// The merged Output Map as a JSON object.
    #[must_use]
    pub fn outputs(&self) -> Value {
        let mut map = Map::new();
        self.layer.collect_outputs(&mut map);
        Value::Object(map)
    }

    /// Create a child scope carrying loop bindings.
    #[must_use]
    pub fn scope(&self, bindings: HashMap<String, Value>) -> Self {
        Self {
            layer: Arc::new(Layer {
                bindings,
                values: Mutex::new(HashMap::new()),
                parent: Some(Arc::clone(&self.layer)),
            }),
            transcript: self.transcript.clone(),
            events: Arc::clone(&self.events),
            track_conflicts: false,
        }
    }

    /// Create the shared scope for a parallel group. Sibling handles are
    /// derived from it with [`ContextStore::sibling`].
    #[must_use]
    pub fn parallel_scope(&self) -> Self {
        let mut scope = self.scope(HashMap::new());
        scope.track_conflicts = true;
        scope
    }

    /// A sibling handle onto the same layer with a buffered transcript.
    #[must_use]
    pub fn sibling(&self) -> Self {
        Self {
            layer: Arc::clone(&self.layer),
            transcript: self.transcript.fork(),
            events: Arc::clone(&self.events),
            track_conflicts: self.track_conflicts,
        }
    }

    /// Copy this layer's output writes into the parent layer.
    pub fn commit(&self) {
        let Some(parent) = &self.layer.parent else {
            return;
        };
        let writes: Vec<(String, Value)> = self
            .layer
            .values
            .lock()
            .map(|values| values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        if let Ok(mut parent_values) = parent.values.lock() {
            parent_values.extend(writes);
        }
    }

    /// Append a message to the transcript.
    pub fn append(&self, message: Message) {
        self.transcript.append(message);
    }

    /// The transcript visible to this handle.
    #[must_use]
    pub fn transcript(&self) -> Vec<Message> {
        self.transcript.view()
    }

    /// Flush this handle's buffered transcript block, if any.
    pub fn join_transcript(&self) {
        self.transcript.join();
    }

    /// Emit an instrumentation event.
    pub fn emit(&self, event: &Event) {
        self.events.emit(event);
    }

    /// Seed the Output Map from a replayed session prefix.
    pub fn seed_outputs(&self, outputs: Map<String, Value>) {
        if let Ok(mut values) = self.layer.values.lock() {
            values.extend(outputs);
        }
    }

    /// Seed the transcript from a replayed session prefix.
    pub fn seed_transcript(&self, messages: Vec<Message>) {
        for message in messages {
            self.transcript.append(message);
        }
    }
}

/// Expression scope over a context plus the workflow object.
pub struct RunScope<'a> {
    ctx: &'a ContextStore,
    workflow: &'a Value,
}

impl<'a> RunScope<'a> {
    /// Build the scope used for `{{…}}` evaluation.
    #[must_use]
    pub const fn new(ctx: &'a ContextStore, workflow: &'a Value) -> Self {
        Self { ctx, workflow }
    }
}

impl Scope for RunScope<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        match name {
            "output" => Some(self.ctx.outputs()),
            "workflow" => Some(self.workflow.clone()),
            other => self.ctx.binding(other),
        }
    }
}
