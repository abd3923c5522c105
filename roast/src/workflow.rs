//! Workflow document schema, validation, and step normalization.
//!
//! A workflow document is YAML: a name, global defaults, a `steps` list, and
//! optional per-step override blocks under top-level keys matching step
//! names. Step specifications are normalized into [`Step`] values before
//! execution so the executor never re-interprets raw YAML.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::expr::as_shell;
use crate::provider::ApiProvider;
use crate::shell;

/// Raw step specification as written in the document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    /// Bare reference, raw prompt, or `$(…)` shell text.
    Reference(String),
    /// Nested sequence: a parallel group.
    Parallel(Vec<StepSpec>),
    /// Mapping whose sole key is a step name.
    Keyed(serde_yaml::Mapping),
}

/// The workflow document as parsed from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDoc {
    /// Workflow name.
    pub name: String,
    /// Default model identifier.
    #[serde(default)]
    pub model: Option<String>,
    /// Which provider API to use.
    #[serde(default)]
    pub api_provider: ApiProvider,
    /// API token, literal or `$(cmd)`.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Names of tools to enable.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Target resource specification.
    #[serde(default)]
    pub target: Option<serde_yaml::Value>,
    /// The step list.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Everything else: per-step overrides and arbitrary workflow fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Modifiers allowed in a composite keyed step body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepBody {
    #[serde(rename = "if")]
    if_: Option<String>,
    unless: Option<String>,
    then: Option<Vec<StepSpec>>,
    #[serde(rename = "else")]
    else_: Option<Vec<StepSpec>>,
    each: Option<String>,
    #[serde(rename = "as")]
    as_: Option<String>,
    steps: Option<Vec<StepSpec>>,
    repeat: Option<RepeatBody>,
    until: Option<String>,
    max_iterations: Option<u64>,
    case: Option<String>,
    when: Option<BTreeMap<String, Vec<StepSpec>>>,
}

/// Body of a `repeat:` block.
#[derive(Debug, Clone, Deserialize)]
struct RepeatBody {
    #[serde(default)]
    until: Option<String>,
    #[serde(default)]
    max_iterations: Option<u64>,
    steps: Vec<StepSpec>,
}

/// Per-step overrides, configured under a top-level key matching the step
/// name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepOverrides {
    /// Model override for this step.
    #[serde(default)]
    pub model: Option<String>,
    /// Request a JSON-object response.
    #[serde(default)]
    pub json: Option<bool>,
    /// Whether shell failures abort the workflow (default true).
    #[serde(default)]
    pub exit_on_error: Option<bool>,
    /// Whether tool results may be served from the per-run cache
    /// (default true).
    #[serde(default)]
    pub cache: Option<bool>,
    /// Per-step timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Maximum tool-call loop depth for this step.
    #[serde(default, rename = "loop")]
    pub max_tool_loops: Option<usize>,
    /// Arbitrary extra parameters, exposed to templates.
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

/// A normalized, executable step.
#[derive(Debug, Clone)]
pub struct Step {
    /// Name under which the result is recorded.
    pub name: String,
    /// What the step does.
    pub kind: StepKind,
}

/// The executable step variants.
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Standard named step: procedural registry or prompt directory.
    Prompt,
    /// `{label: step_name}`: run the named standard step, recording the
    /// result under the label.
    Alias {
        /// Name of the standard step to run.
        target: String,
    },
    /// Bare reference containing whitespace: one tool-less prompt turn.
    RawPrompt {
        /// The literal prompt text.
        text: String,
    },
    /// `$(cmd)` shell step.
    Shell {
        /// The command line.
        command: String,
    },
    /// `if`/`unless` with `then`/`else` branches.
    Conditional {
        /// Condition value, run through the coercion ladder.
        condition: String,
        /// True for `unless`.
        negate: bool,
        /// Substeps when the condition holds.
        then_steps: Vec<Step>,
        /// Substeps when it does not.
        else_steps: Vec<Step>,
    },
    /// `each`/`as`/`steps` iteration.
    Each {
        /// Iterable value, run through the coercion ladder.
        iterable: String,
        /// Binding name for the current element.
        binding: String,
        /// Loop body.
        body: Vec<Step>,
    },
    /// `repeat`/`until`/`max_iterations` iteration.
    Repeat {
        /// Stop condition, checked after each pass.
        until: Option<String>,
        /// Upper bound on passes.
        max_iterations: Option<u64>,
        /// Loop body.
        body: Vec<Step>,
    },
    /// `case`/`when`/`else`.
    Case {
        /// Case expression value.
        expr: String,
        /// Branches by string equality.
        when: Vec<(String, Vec<Step>)>,
        /// Fallback branch.
        else_steps: Vec<Step>,
    },
    /// Concurrent group of sibling steps.
    Parallel {
        /// The sibling steps.
        branches: Vec<Step>,
    },
}

/// A workflow document compiled for execution.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// The parsed document.
    pub doc: WorkflowDoc,
    /// Normalized steps.
    pub steps: Vec<Step>,
    /// Per-step overrides resolved from top-level keys.
    pub overrides: HashMap<String, StepOverrides>,
    /// Directory the document was loaded from; prompt directories resolve
    /// against it.
    pub dir: PathBuf,
}

impl WorkflowDoc {
    /// Parse a document from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let doc: Self = serde_yaml::from_str(text)?;
        Ok(doc)
    }
}

impl Workflow {
    /// Load and compile a workflow document from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("cannot read workflow {}: {e}", path.display()))
        })?;
        let doc = WorkflowDoc::from_yaml(&text)?;
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::compile(doc, dir)
    }

    /// Compile a parsed document: normalize steps and resolve overrides.
    pub fn compile(doc: WorkflowDoc, dir: PathBuf) -> Result<Self> {
        if doc.name.trim().is_empty() {
            return Err(Error::Config("workflow name must not be empty".into()));
        }
        if doc.steps.is_empty() {
            return Err(Error::Config(format!(
                "workflow '{}' has no steps",
                doc.name
            )));
        }

        let steps = compile_steps(&doc.steps)?;

        let mut overrides = HashMap::new();
        let step_names: Vec<String> = collect_names(&steps);
        for (key, value) in &doc.extra {
            if step_names.iter().any(|n| n == key) {
                let parsed: StepOverrides =
                    serde_yaml::from_value(value.clone()).map_err(|e| {
                        Error::Config(format!("invalid overrides for step '{key}': {e}"))
                    })?;
                overrides.insert(key.clone(), parsed);
            }
        }

        Ok(Self {
            doc,
            steps,
            overrides,
            dir,
        })
    }

    /// Overrides for a step, if configured.
    #[must_use]
    pub fn overrides_for(&self, name: &str) -> StepOverrides {
        self.overrides.get(name).cloned().unwrap_or_default()
    }

    /// SHA-256 over the ordered top-level step names; replay compatibility
    /// check.
    #[must_use]
    pub fn steps_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for step in &self.steps {
            hasher.update(step.name.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// The workflow object exposed to expressions: `name`, `file`,
    /// `verbose`, `concise`, plus every extra configured field.
    #[must_use]
    pub fn as_value(&self, file: Option<&str>, verbose: bool, concise: bool) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("name".into(), Value::String(self.doc.name.clone()));
        map.insert(
            "file".into(),
            file.map_or(Value::Null, |f| Value::String(f.to_string())),
        );
        map.insert("verbose".into(), Value::Bool(verbose));
        map.insert("concise".into(), Value::Bool(concise));
        if let Some(model) = &self.doc.model {
            map.insert("model".into(), Value::String(model.clone()));
        }
        for (key, value) in &self.doc.extra {
            if let Ok(json) = yaml_to_json(value.clone()) {
                map.insert(key.clone(), json);
            }
        }
        Value::Object(map)
    }

    /// Resolve the configured API token, running a `$(cmd)` form if present.
    pub async fn resolve_api_token(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let Some(token) = &self.doc.api_token else {
            return Ok(None);
        };
        if let Some(command) = as_shell(token) {
            let outcome = shell::run_checked(command, cancel).await?;
            Ok(Some(outcome.stdout.trim().to_string()))
        } else {
            Ok(Some(token.clone()))
        }
    }
}

/// Convert a YAML value to JSON. Non-string mapping keys are rejected.
pub fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Config(format!("unsupported value: {e}")))
}

/// Every step name in the tree, including nested substeps; override blocks
/// may target any of them.
fn collect_names(steps: &[Step]) -> Vec<String> {
    let mut names = Vec::new();
    collect_names_into(steps, &mut names);
    names
}

fn collect_names_into(steps: &[Step], names: &mut Vec<String>) {
    for step in steps {
        names.push(step.name.clone());
        match &step.kind {
            StepKind::Conditional {
                then_steps,
                else_steps,
                ..
            } => {
                collect_names_into(then_steps, names);
                collect_names_into(else_steps, names);
            }
            StepKind::Each { body, .. } | StepKind::Repeat { body, .. } => {
                collect_names_into(body, names);
            }
            StepKind::Case {
                when, else_steps, ..
            } => {
                for (_, branch) in when {
                    collect_names_into(branch, names);
                }
                collect_names_into(else_steps, names);
            }
            StepKind::Parallel { branches } => collect_names_into(branches, names),
            StepKind::Prompt
            | StepKind::Alias { .. }
            | StepKind::RawPrompt { .. }
            | StepKind::Shell { .. } => {}
        }
    }
}

fn compile_steps(specs: &[StepSpec]) -> Result<Vec<Step>> {
    specs.iter().map(compile_step).collect()
}

fn compile_step(spec: &StepSpec) -> Result<Step> {
    match spec {
        StepSpec::Reference(text) => Ok(compile_reference(text)),
        StepSpec::Parallel(specs) => {
            let branches = compile_steps(specs)?;
            if branches.is_empty() {
                return Err(Error::Config("parallel group has no steps".into()));
            }
            Ok(Step {
                name: "parallel".to_string(),
                kind: StepKind::Parallel { branches },
            })
        }
        StepSpec::Keyed(mapping) => compile_keyed(mapping),
    }
}

fn compile_reference(text: &str) -> Step {
    if let Some(command) = as_shell(text) {
        return Step {
            name: command.to_string(),
            kind: StepKind::Shell {
                command: command.to_string(),
            },
        };
    }
    // Raw-prompt detection looks at the bare, pre-interpolation name.
    if text.trim().contains(char::is_whitespace) {
        Step {
            name: raw_prompt_name(text),
            kind: StepKind::RawPrompt {
                text: text.to_string(),
            },
        }
    } else {
        Step {
            name: text.trim().to_string(),
            kind: StepKind::Prompt,
        }
    }
}

/// Short stable name for a raw prompt step.
fn raw_prompt_name(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    format!("prompt_{:02x}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2], digest[3])
}

fn compile_keyed(mapping: &serde_yaml::Mapping) -> Result<Step> {
    if mapping.len() != 1 {
        return Err(Error::Config(format!(
            "a keyed step must have exactly one key, found {}",
            mapping.len()
        )));
    }
    let (key, value) = mapping
        .iter()
        .next()
        .ok_or_else(|| Error::Config("empty keyed step".into()))?;
    let Some(name) = key.as_str() else {
        return Err(Error::Config("step keys must be strings".into()));
    };
    let name = name.to_string();

    match value {
        // `{key: $(cmd)}`, `{key: "raw prompt"}`, or `{key: step_name}`,
        // stored under the explicit key. Mapping-form keys are always names.
        serde_yaml::Value::String(text) => {
            let kind = if let Some(command) = as_shell(text) {
                StepKind::Shell {
                    command: command.to_string(),
                }
            } else if text.trim().contains(char::is_whitespace) {
                StepKind::RawPrompt {
                    text: text.clone(),
                }
            } else {
                StepKind::Alias {
                    target: text.trim().to_string(),
                }
            };
            Ok(Step { name, kind })
        }
        serde_yaml::Value::Mapping(_) => {
            let body: StepBody = serde_yaml::from_value(value.clone())
                .map_err(|e| Error::Config(format!("step '{name}': {e}")))?;
            compile_body(name, body)
        }
        other => Err(Error::Config(format!(
            "step '{name}': unsupported value {other:?}"
        ))),
    }
}

fn compile_body(name: String, body: StepBody) -> Result<Step> {
    // Iteration: each/as/steps.
    if let Some(iterable) = body.each {
        let binding = body.as_.ok_or_else(|| {
            Error::Config(format!("step '{name}': `each` requires `as`"))
        })?;
        let steps = body.steps.ok_or_else(|| {
            Error::Config(format!("step '{name}': `each` requires `steps`"))
        })?;
        return Ok(Step {
            name,
            kind: StepKind::Each {
                iterable,
                binding,
                body: compile_steps(&steps)?,
            },
        });
    }

    // Iteration: repeat (nested or flat form).
    if let Some(repeat) = body.repeat {
        return compile_repeat(name, repeat.until, repeat.max_iterations, &repeat.steps);
    }
    if body.until.is_some() || body.max_iterations.is_some() {
        let steps = body.steps.ok_or_else(|| {
            Error::Config(format!("step '{name}': `repeat` requires `steps`"))
        })?;
        return compile_repeat(name, body.until, body.max_iterations, &steps);
    }

    // Case/when/else.
    if let Some(expr) = body.case {
        let when = body.when.ok_or_else(|| {
            Error::Config(format!("step '{name}': `case` requires `when`"))
        })?;
        let mut branches = Vec::with_capacity(when.len());
        for (key, specs) in when {
            branches.push((key, compile_steps(&specs)?));
        }
        let else_steps = match body.else_ {
            Some(specs) => compile_steps(&specs)?,
            None => Vec::new(),
        };
        return Ok(Step {
            name,
            kind: StepKind::Case {
                expr,
                when: branches,
                else_steps,
            },
        });
    }

    // Conditional: if/unless, with branches or as a guard on the named step.
    let (condition, negate) = match (body.if_, body.unless) {
        (Some(_), Some(_)) => {
            return Err(Error::Config(format!(
                "step '{name}': `if` and `unless` are mutually exclusive"
            )));
        }
        (Some(c), None) => (c, false),
        (None, Some(c)) => (c, true),
        (None, None) => {
            return Err(Error::Config(format!(
                "step '{name}': unrecognized step form"
            )));
        }
    };

    let has_branches = body.then.is_some() || body.else_.is_some();
    let then_steps = match body.then {
        Some(specs) => compile_steps(&specs)?,
        // Guard form: the condition gates the named standard step itself.
        None if !has_branches => vec![Step {
            name: name.clone(),
            kind: StepKind::Prompt,
        }],
        None => Vec::new(),
    };
    let else_steps = match body.else_ {
        Some(specs) => compile_steps(&specs)?,
        None => Vec::new(),
    };

    Ok(Step {
        name,
        kind: StepKind::Conditional {
            condition,
            negate,
            then_steps,
            else_steps,
        },
    })
}

fn compile_repeat(
    name: String,
    until: Option<String>,
    max_iterations: Option<u64>,
    steps: &[StepSpec],
) -> Result<Step> {
    if until.is_none() && max_iterations.is_none() {
        return Err(Error::Config(format!(
            "step '{name}': `repeat` requires `until` or `max_iterations`"
        )));
    }
    Ok(Step {
        name,
        kind: StepKind::Repeat {
            until,
            max_iterations,
            body: compile_steps(steps)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(yaml: &str) -> Result<Workflow> {
        let doc = WorkflowDoc::from_yaml(yaml)?;
        Workflow::compile(doc, PathBuf::from("."))
    }

    #[test]
    fn parses_reference_forms() {
        let wf = compile(
            "name: demo\nsteps:\n  - analyze\n  - Summarize the findings\n  - $(echo hi)\n",
        )
        .unwrap();
        assert_eq!(wf.steps.len(), 3);
        assert!(matches!(wf.steps[0].kind, StepKind::Prompt));
        assert_eq!(wf.steps[0].name, "analyze");
        assert!(matches!(wf.steps[1].kind, StepKind::RawPrompt { .. }));
        match &wf.steps[2].kind {
            StepKind::Shell { command } => assert_eq!(command, "echo hi"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn keyed_shell_step_uses_explicit_name() {
        let wf = compile("name: demo\nsteps:\n  - s1: $(echo hi)\n").unwrap();
        assert_eq!(wf.steps[0].name, "s1");
        assert!(matches!(wf.steps[0].kind, StepKind::Shell { .. }));
    }

    #[test]
    fn interpolated_key_is_a_name_not_a_raw_prompt() {
        let wf = compile("name: demo\nsteps:\n  - \"result_{{file}}\"\n").unwrap();
        assert!(matches!(wf.steps[0].kind, StepKind::Prompt));
    }

    #[test]
    fn mapping_value_forms() {
        let yaml = "name: demo\nsteps:\n  - \"result_{{file}}\": store_results\n  - summary: \"Summarize {{output['s1']}}\"\n";
        let wf = compile(yaml).unwrap();
        match &wf.steps[0].kind {
            StepKind::Alias { target } => assert_eq!(target, "store_results"),
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(wf.steps[0].name, "result_{{file}}");
        assert!(matches!(wf.steps[1].kind, StepKind::RawPrompt { .. }));
        assert_eq!(wf.steps[1].name, "summary");
    }

    #[test]
    fn compiles_conditional_with_branches() {
        let yaml = r#"
name: demo
steps:
  - check:
      if: "false"
      then:
        - then_step
      else:
        - else_step
"#;
        let wf = compile(yaml).unwrap();
        match &wf.steps[0].kind {
            StepKind::Conditional {
                condition,
                negate,
                then_steps,
                else_steps,
            } => {
                assert_eq!(condition, "false");
                assert!(!negate);
                assert_eq!(then_steps[0].name, "then_step");
                assert_eq!(else_steps[0].name, "else_step");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn guard_form_gates_the_named_step() {
        let yaml = "name: demo\nsteps:\n  - deploy:\n      unless: \"{{workflow.concise}}\"\n";
        let wf = compile(yaml).unwrap();
        match &wf.steps[0].kind {
            StepKind::Conditional {
                negate, then_steps, ..
            } => {
                assert!(negate);
                assert_eq!(then_steps.len(), 1);
                assert_eq!(then_steps[0].name, "deploy");
                assert!(matches!(then_steps[0].kind, StepKind::Prompt));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn compiles_each_and_repeat() {
        let yaml = r#"
name: demo
steps:
  - files:
      each: "$(ls)"
      as: file
      steps:
        - "Describe {{file}}"
  - settle:
      repeat:
        until: "{{output['done'] == true}}"
        max_iterations: 3
        steps:
          - iterate
"#;
        let wf = compile(yaml).unwrap();
        match &wf.steps[0].kind {
            StepKind::Each {
                iterable, binding, body,
            } => {
                assert_eq!(iterable, "$(ls)");
                assert_eq!(binding, "file");
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        match &wf.steps[1].kind {
            StepKind::Repeat {
                until,
                max_iterations,
                ..
            } => {
                assert!(until.is_some());
                assert_eq!(*max_iterations, Some(3));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn repeat_requires_a_bound_or_condition() {
        let yaml = "name: demo\nsteps:\n  - s:\n      repeat:\n        steps: [x]\n";
        assert!(matches!(compile(yaml), Err(Error::Config(_))));
    }

    #[test]
    fn compiles_case_and_parallel() {
        let yaml = r#"
name: demo
steps:
  - route:
      case: "{{output['kind']}}"
      when:
        bug: [triage_bug]
        feature: [plan_feature]
      else:
        - fallthrough
  - - left
    - right
"#;
        let wf = compile(yaml).unwrap();
        match &wf.steps[0].kind {
            StepKind::Case { when, else_steps, .. } => {
                assert_eq!(when.len(), 2);
                assert_eq!(else_steps[0].name, "fallthrough");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        match &wf.steps[1].kind {
            StepKind::Parallel { branches } => assert_eq!(branches.len(), 2),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn overrides_resolve_by_step_name() {
        let yaml = r#"
name: demo
model: m1
steps:
  - s1
  - s2
s2:
  model: m2
  json: true
  custom_param: 7
"#;
        let wf = compile(yaml).unwrap();
        let o = wf.overrides_for("s2");
        assert_eq!(o.model.as_deref(), Some("m2"));
        assert_eq!(o.json, Some(true));
        assert_eq!(
            o.params.get("custom_param"),
            Some(&serde_yaml::Value::Number(7.into()))
        );
        assert!(wf.overrides_for("s1").model.is_none());
    }

    #[test]
    fn extra_keys_surface_as_workflow_fields() {
        let yaml = "name: demo\nsteps: [s1]\nproject: roast\n";
        let wf = compile(yaml).unwrap();
        let value = wf.as_value(Some("a.rs"), true, false);
        assert_eq!(value["project"], "roast");
        assert_eq!(value["file"], "a.rs");
        assert_eq!(value["verbose"], true);
        assert_eq!(value["concise"], false);
    }

    #[test]
    fn steps_hash_tracks_names_and_order() {
        let a = compile("name: d\nsteps: [s1, s2]\n").unwrap();
        let b = compile("name: d\nsteps: [s2, s1]\n").unwrap();
        let c = compile("name: d\nsteps: [s1, s2]\n").unwrap();
        assert_ne!(a.steps_hash(), b.steps_hash());
        assert_eq!(a.steps_hash(), c.steps_hash());
    }

    #[test]
    fn rejects_empty_and_malformed_documents() {
        assert!(matches!(
            compile("name: demo\nsteps: []\n"),
            Err(Error::Config(_))
        ));
        assert!(compile("steps: [s1]\n").is_err());
    }

    #[tokio::test]
    async fn api_token_shell_form_is_resolved() {
        let yaml = "name: demo\nsteps: [s1]\napi_token: $(printf sk-from-cmd)\n";
        let wf = compile(yaml).unwrap();
        let token = wf
            .resolve_api_token(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(token.as_deref(), Some("sk-from-cmd"));
    }
}
