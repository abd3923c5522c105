//! Step kinds: results, procedural steps, prompt directories, and the
//! output-template hook.
//!
//! A standard step named `X` resolves to either a registered procedural
//! implementation or a prompt directory `X/prompt.md` next to the workflow
//! file. Procedural implementations win; the registry is explicit state
//! owned by the executor.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::ContextStore;
use crate::error::Result;
use crate::expr::{Scope, interpolate_exprs};

/// Result of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// The raw textual response (assistant content, shell stdout, or the
    /// string form of a procedural return).
    pub raw_response: String,
    /// Structured value, when the step produced one (JSON mode, procedural
    /// returns, loop aggregates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    /// Exit status for shell steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl StepResult {
    /// Wrap a plain text result.
    #[must_use]
    pub fn text(raw: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            raw_response: raw.into(),
            structured: None,
            exit_status: None,
            duration_ms,
        }
    }

    /// The value recorded in the Output Map.
    #[must_use]
    pub fn value(&self) -> Value {
        self.structured
            .clone()
            .unwrap_or_else(|| Value::String(self.raw_response.clone()))
    }
}

/// Everything a procedural step sees.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The shared execution context.
    pub ctx: ContextStore,
    /// The workflow object (name, file, verbose, concise, configured
    /// fields).
    pub workflow: Value,
    /// Cooperative cancellation token for the run.
    pub cancel: CancellationToken,
}

/// A host-language step implementation.
#[async_trait]
pub trait ProceduralStep: Send + Sync {
    /// Run the step, returning its result value.
    async fn run(&self, ctx: StepContext) -> Result<Value>;
}

/// Adapter turning an async closure into a [`ProceduralStep`].
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F, Fut> ProceduralStep for FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send,
{
    async fn run(&self, ctx: StepContext) -> Result<Value> {
        (self.0)(ctx).await
    }
}

/// Registry of procedural step implementations, keyed by step name.
#[derive(Clone, Default)]
pub struct StepRegistry {
    procedures: HashMap<String, Arc<dyn ProceduralStep>>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("StepRegistry")
            .field("procedures", &names)
            .finish()
    }
}

impl StepRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedural step under `name`.
    pub fn register(&mut self, name: impl Into<String>, step: impl ProceduralStep + 'static) {
        self.procedures.insert(name.into(), Arc::new(step));
    }

    /// Register an async closure under `name`.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(name, FnStep(f));
    }

    /// Look up a procedural step.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProceduralStep>> {
        self.procedures.get(name).cloned()
    }
}

/// A resolved prompt directory for a standard step.
#[derive(Debug, Clone)]
pub struct PromptDir {
    /// Path of `prompt.md`.
    pub prompt_path: PathBuf,
    /// Path of the optional `output.txt` template.
    pub output_template_path: Option<PathBuf>,
}

/// Locate `<base>/<name>/prompt.md` and its optional output template.
#[must_use]
pub fn resolve_prompt_dir(base: &Path, name: &str) -> Option<PromptDir> {
    let dir = base.join(name);
    let prompt_path = dir.join("prompt.md");
    if !prompt_path.is_file() {
        return None;
    }
    let output_template_path = Some(dir.join("output.txt")).filter(|p| p.is_file());
    Some(PromptDir {
        prompt_path,
        output_template_path,
    })
}

/// Hook point for rendering a step's `output.txt` template.
///
/// The engine does not mandate a template language; the default renderer
/// applies the `{{…}}` interpolation pass with `response`, `output`, and
/// `workflow` in scope.
pub trait OutputRenderer: Send + Sync {
    /// Render `template` against the step scope.
    fn render(&self, template: &str, scope: &dyn Scope) -> Result<String>;
}

/// Default renderer: expression interpolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprRenderer;

impl OutputRenderer for ExprRenderer {
    fn render(&self, template: &str, scope: &dyn Scope) -> Result<String> {
        interpolate_exprs(template, scope)
    }
}

/// Scope wrapper exposing `response` on top of the run scope.
pub struct TemplateScope<'a> {
    inner: &'a dyn Scope,
    response: Value,
}

impl<'a> TemplateScope<'a> {
    /// Wrap `inner`, adding the step's raw response.
    #[must_use]
    pub fn new(inner: &'a dyn Scope, response: impl Into<String>) -> Self {
        Self {
            inner,
            response: Value::String(response.into()),
        }
    }
}

impl Scope for TemplateScope<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        if name == "response" {
            Some(self.response.clone())
        } else {
            self.inner.resolve(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_value_prefers_structured() {
        let mut result = StepResult::text("raw", 1);
        assert_eq!(result.value(), json!("raw"));
        result.structured = Some(json!({"k": 1}));
        assert_eq!(result.value(), json!({"k": 1}));
    }

    #[tokio::test]
    async fn registry_runs_closures() {
        let mut registry = StepRegistry::new();
        registry.register_fn("double", |sc: StepContext| async move {
            let n = sc.ctx.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(json!(n * 2))
        });

        let ctx = ContextStore::default();
        ctx.record("n", json!(21));
        let step = registry.get("double").unwrap();
        let out = step
            .run(StepContext {
                ctx,
                workflow: json!({}),
                cancel: CancellationToken::new(),
            })
            .await
            .unwrap();
        assert_eq!(out, json!(42));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn prompt_dir_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let step_dir = dir.path().join("analyze");
        std::fs::create_dir_all(&step_dir).unwrap();
        std::fs::write(step_dir.join("prompt.md"), "Analyze {{workflow.file}}").unwrap();

        let resolved = resolve_prompt_dir(dir.path(), "analyze").unwrap();
        assert!(resolved.prompt_path.ends_with("analyze/prompt.md"));
        assert!(resolved.output_template_path.is_none());

        std::fs::write(step_dir.join("output.txt"), "{{response}}").unwrap();
        let resolved = resolve_prompt_dir(dir.path(), "analyze").unwrap();
        assert!(resolved.output_template_path.is_some());

        assert!(resolve_prompt_dir(dir.path(), "missing").is_none());
    }

    #[test]
    fn template_scope_exposes_response() {
        let base: HashMap<String, Value> = HashMap::from([("x".to_string(), json!(1))]);
        let scope = TemplateScope::new(&base, "the answer");
        let rendered = ExprRenderer
            .render("r={{response}} x={{x}}", &scope)
            .unwrap();
        assert_eq!(rendered, "r=the answer x=1");
    }
}
