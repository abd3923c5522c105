//! The scheduler: top-level step traversal, control flow, error policy, and
//! instrumentation.
//!
//! The traversal is single-threaded and cooperative; only parallel groups
//! spawn workers, one per sibling, sharing the group context and a child
//! cancellation token. Suspension points are chat completions, tool
//! dispatches, shell commands, and session file writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::{ContextStore, RunScope};
use crate::dispatch::ToolDispatcher;
use crate::driver::{ChatDriver, DEFAULT_MAX_TOOL_LOOPS, TurnOptions};
use crate::error::{Error, Result};
use crate::event::{Event, EventSink, TracingSink};
use crate::expr::{interpolate, interpolate_exprs, value_to_string};
use crate::flow;
use crate::provider::{ChatClient, ChatParams};
use crate::session::{ReplayState, SessionRecorder, StepRecord};
use crate::shell;
use crate::step::{
    ExprRenderer, OutputRenderer, StepContext, StepRegistry, StepResult, TemplateScope,
    resolve_prompt_dir,
};
use crate::tool::{ToolDefinition, ToolRegistry};
use crate::workflow::{Step, StepKind, StepOverrides, Workflow};

struct Inner {
    client: Arc<dyn ChatClient>,
    dispatcher: ToolDispatcher,
    procedures: StepRegistry,
    renderer: Arc<dyn OutputRenderer>,
    events: Arc<dyn EventSink>,
    workflow: Workflow,
    workflow_value: Value,
    tool_defs: Vec<ToolDefinition>,
    session: Option<SessionRecorder>,
    replay: Option<ReplayState>,
    verbose: bool,
}

/// Executes one workflow run.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("workflow", &self.inner.workflow.doc.name)
            .finish()
    }
}

/// Builder for [`Executor`].
pub struct ExecutorBuilder {
    workflow: Workflow,
    client: Arc<dyn ChatClient>,
    tools: ToolRegistry,
    procedures: StepRegistry,
    renderer: Arc<dyn OutputRenderer>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    session: Option<SessionRecorder>,
    replay: Option<ReplayState>,
    target: Option<String>,
    verbose: bool,
    concise: bool,
}

impl std::fmt::Debug for ExecutorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorBuilder")
            .field("workflow", &self.workflow.doc.name)
            .finish()
    }
}

impl ExecutorBuilder {
    /// Start building an executor for `workflow` talking to `client`.
    #[must_use]
    pub fn new(workflow: Workflow, client: Arc<dyn ChatClient>) -> Self {
        Self {
            workflow,
            client,
            tools: ToolRegistry::new(),
            procedures: StepRegistry::new(),
            renderer: Arc::new(ExprRenderer),
            events: Arc::new(TracingSink),
            cancel: CancellationToken::new(),
            session: None,
            replay: None,
            target: None,
            verbose: false,
            concise: false,
        }
    }

    /// Provide the tool registry.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Provide procedural step implementations.
    #[must_use]
    pub fn procedures(mut self, procedures: StepRegistry) -> Self {
        self.procedures = procedures;
        self
    }

    /// Replace the output-template renderer.
    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn OutputRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replace the event sink.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Use an external cancellation token (signal handling).
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record the run into this session.
    #[must_use]
    pub fn session(mut self, session: SessionRecorder) -> Self {
        self.session = Some(session);
        self
    }

    /// Resume from a replayed session prefix.
    #[must_use]
    pub fn replay(mut self, replay: ReplayState) -> Self {
        self.replay = Some(replay);
        self
    }

    /// Set the resolved target resource.
    #[must_use]
    pub fn target(mut self, target: Option<String>) -> Self {
        self.target = target;
        self
    }

    /// Stream per-step output.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the workflow `concise` flag.
    #[must_use]
    pub const fn concise(mut self, concise: bool) -> Self {
        self.concise = concise;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<Executor> {
        for name in &self.workflow.doc.tools {
            if !self.tools.contains(name) {
                return Err(Error::Config(format!("unknown tool '{name}'")));
            }
        }
        let tool_defs = self.tools.definitions_for(&self.workflow.doc.tools);
        let workflow_value =
            self.workflow
                .as_value(self.target.as_deref(), self.verbose, self.concise);
        let registry = Arc::new(self.tools);

        Ok(Executor {
            inner: Arc::new(Inner {
                client: self.client,
                dispatcher: ToolDispatcher::new(registry),
                procedures: self.procedures,
                renderer: self.renderer,
                events: self.events,
                workflow: self.workflow,
                workflow_value,
                tool_defs,
                session: self.session,
                replay: self.replay,
                verbose: self.verbose,
            }),
            cancel: self.cancel,
        })
    }
}

impl Executor {
    /// Start building an executor.
    #[must_use]
    pub fn builder(workflow: Workflow, client: Arc<dyn ChatClient>) -> ExecutorBuilder {
        ExecutorBuilder::new(workflow, client)
    }

    /// Run the workflow, returning the last step's result value.
    ///
    /// A fatal error aborts at the current step boundary; the session
    /// snapshot of the preceding step is already on disk.
    pub async fn run(&self) -> Result<Value> {
        let ctx = ContextStore::new(Arc::clone(&self.inner.events));
        let start_index = match &self.inner.replay {
            Some(replay) => {
                ctx.seed_outputs(replay.outputs.clone());
                ctx.seed_transcript(replay.transcript.clone());
                replay.resume_index
            }
            None => 0,
        };

        let mut last = Value::String(String::new());
        for (index, step) in self.inner.workflow.steps.iter().enumerate() {
            if index < start_index {
                continue;
            }
            last = self.run_one(&ctx, step, index, true).await?;
        }
        Ok(last)
    }

    fn events(&self) -> &dyn EventSink {
        self.inner.events.as_ref()
    }

    /// A handle whose suspension points observe `cancel` instead of the
    /// run-level token. Used for parallel group workers.
    fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel,
        }
    }

    /// Execute one step: events, timeout, result recording, session
    /// snapshot.
    async fn run_one(
        &self,
        ctx: &ContextStore,
        step: &Step,
        index: usize,
        top_level: bool,
    ) -> Result<Value> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let name = self.display_name(ctx, step)?;
        self.events().emit(&Event::StepStarted {
            name: name.clone(),
            index,
        });
        let started_at = Utc::now();
        let t0 = Instant::now();

        let overrides = self.inner.workflow.overrides_for(&step.name);
        let outcome = match overrides.timeout {
            Some(seconds) => {
                match tokio::time::timeout(
                    Duration::from_secs(seconds),
                    self.execute(ctx, step, &name),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.events().emit(&Event::StepTimeout {
                            name: name.clone(),
                            seconds,
                        });
                        Err(Error::Timeout {
                            step: name.clone(),
                            seconds,
                        })
                    }
                }
            }
            None => self.execute(ctx, step, &name).await,
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(err) => {
                let err = err.in_step(name.clone());
                self.events().emit(&Event::StepFailed {
                    name,
                    error: err.to_string(),
                });
                return Err(err);
            }
        };
        result.duration_ms = u64::try_from(t0.elapsed().as_millis()).unwrap_or(u64::MAX);

        let value = result.value();
        ctx.record(&name, value.clone());
        self.events().emit(&Event::StepFinished {
            name: name.clone(),
            index,
            duration_ms: result.duration_ms,
        });
        if self.inner.verbose {
            info!(step = %name, output = %result.raw_response, "step output");
        }

        if top_level && let Some(session) = &self.inner.session {
            session
                .record_step(&StepRecord {
                    step_index: index,
                    name,
                    started_at,
                    finished_at: Utc::now(),
                    result,
                    transcript: ctx.transcript(),
                })
                .await?;
        }

        Ok(value)
    }

    /// Step names may interpolate (`result_{{file}}`); events, the Output
    /// Map, and session records use the resolved name.
    fn display_name(&self, ctx: &ContextStore, step: &Step) -> Result<String> {
        if step.name.contains("{{") {
            let scope = RunScope::new(ctx, &self.inner.workflow_value);
            interpolate_exprs(&step.name, &scope)
        } else {
            Ok(step.name.clone())
        }
    }

    /// Run a substep sequence; the sequence result is the last substep's
    /// value, or an empty string if none ran.
    fn run_sequence<'a>(
        &'a self,
        ctx: &'a ContextStore,
        steps: &'a [Step],
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let mut last = Value::String(String::new());
            for (index, step) in steps.iter().enumerate() {
                last = self.run_one(ctx, step, index, false).await?;
            }
            Ok(last)
        })
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ContextStore,
        step: &'a Step,
        name: &'a str,
    ) -> BoxFuture<'a, Result<StepResult>> {
        Box::pin(async move {
            match &step.kind {
                StepKind::Prompt => self.standard_step(ctx, name, &step.name).await,
                StepKind::Alias { target } => self.standard_step(ctx, target, &step.name).await,
                StepKind::RawPrompt { text } => self.raw_prompt(ctx, text, &step.name).await,
                StepKind::Shell { command } => self.shell_step(ctx, command, &step.name).await,
                StepKind::Conditional {
                    condition,
                    negate,
                    then_steps,
                    else_steps,
                } => {
                    let holds = flow::resolve_condition(
                        condition,
                        ctx,
                        &self.inner.workflow_value,
                        &self.cancel,
                    )
                    .await?
                        ^ negate;
                    let branch = if holds { then_steps } else { else_steps };
                    let value = self.run_sequence(ctx, branch).await?;
                    Ok(value_result(value))
                }
                StepKind::Each {
                    iterable,
                    binding,
                    body,
                } => {
                    let overrides = self.inner.workflow.overrides_for(&step.name);
                    let items = flow::resolve_iterable(
                        iterable,
                        ctx,
                        &self.inner.workflow_value,
                        &self.cancel,
                        overrides.exit_on_error.unwrap_or(true),
                    )
                    .await?;

                    let loop_scope = ctx.scope(HashMap::new());
                    let mut tails = Vec::with_capacity(items.len());
                    for item in items {
                        let iter_scope =
                            loop_scope.scope(HashMap::from([(binding.clone(), item)]));
                        let tail = self.run_sequence(&iter_scope, body).await?;
                        // Writes become visible to the next iteration, then
                        // die with the loop scope.
                        iter_scope.commit();
                        tails.push(tail);
                    }
                    Ok(value_result(Value::Array(tails)))
                }
                StepKind::Repeat {
                    until,
                    max_iterations,
                    body,
                } => {
                    let loop_scope = ctx.scope(HashMap::new());
                    let mut tails = Vec::new();
                    let mut iterations = 0u64;
                    loop {
                        if let Some(max) = max_iterations
                            && iterations >= *max
                        {
                            if until.is_some() {
                                self.events().emit(&Event::RepeatExhausted {
                                    name: name.to_string(),
                                    iterations,
                                });
                            }
                            break;
                        }
                        tails.push(self.run_sequence(&loop_scope, body).await?);
                        iterations += 1;
                        if let Some(until) = until
                            && flow::resolve_condition(
                                until,
                                &loop_scope,
                                &self.inner.workflow_value,
                                &self.cancel,
                            )
                            .await?
                        {
                            break;
                        }
                    }
                    Ok(value_result(Value::Array(tails)))
                }
                StepKind::Case {
                    expr,
                    when,
                    else_steps,
                } => {
                    let value = flow::resolve_case_value(
                        expr,
                        ctx,
                        &self.inner.workflow_value,
                        &self.cancel,
                    )
                    .await?;
                    let branch = when
                        .iter()
                        .find(|(key, _)| *key == value)
                        .map_or(else_steps.as_slice(), |(_, steps)| steps.as_slice());
                    let value = self.run_sequence(ctx, branch).await?;
                    Ok(value_result(value))
                }
                StepKind::Parallel { branches } => self.parallel_group(ctx, branches).await,
            }
        })
    }

    /// Standard step: procedural implementation wins over a prompt
    /// directory.
    async fn standard_step(
        &self,
        ctx: &ContextStore,
        name: &str,
        overrides_key: &str,
    ) -> Result<StepResult> {
        let overrides = self.inner.workflow.overrides_for(overrides_key);

        if let Some(procedure) = self.inner.procedures.get(name) {
            let value = procedure
                .run(StepContext {
                    ctx: ctx.clone(),
                    workflow: self.inner.workflow_value.clone(),
                    cancel: self.cancel.clone(),
                })
                .await?;
            return Ok(value_result(value));
        }

        let resolved_name = if name.contains("{{") {
            let scope = RunScope::new(ctx, &self.inner.workflow_value);
            interpolate_exprs(name, &scope)?
        } else {
            name.to_string()
        };
        let Some(prompt_dir) = resolve_prompt_dir(&self.inner.workflow.dir, &resolved_name)
        else {
            return Err(Error::Config(format!(
                "step '{resolved_name}' has no prompt directory or procedural implementation"
            )));
        };

        let template = tokio::fs::read_to_string(&prompt_dir.prompt_path).await?;
        let scope = RunScope::new(ctx, &self.inner.workflow_value);
        let prompt = interpolate(
            &template,
            &scope,
            &self.cancel,
            overrides.exit_on_error.unwrap_or(true),
        )
        .await?;

        let response = self
            .prompt_turn(ctx, prompt, &overrides, self.inner.tool_defs.clone())
            .await?;

        if let Some(template_path) = &prompt_dir.output_template_path {
            let template = tokio::fs::read_to_string(template_path).await?;
            let scope = RunScope::new(ctx, &self.inner.workflow_value);
            let template_scope = TemplateScope::new(&scope, response.clone());
            let rendered = self.inner.renderer.render(&template, &template_scope)?;
            return Ok(StepResult::text(rendered, 0));
        }

        if overrides.json.unwrap_or(false)
            && let Ok(structured) = serde_json::from_str::<Value>(&response)
        {
            return Ok(StepResult {
                raw_response: response,
                structured: Some(structured),
                exit_status: None,
                duration_ms: 0,
            });
        }
        Ok(StepResult::text(response, 0))
    }

    /// Raw prompt: one turn, literal text, no tools offered.
    async fn raw_prompt(
        &self,
        ctx: &ContextStore,
        text: &str,
        overrides_key: &str,
    ) -> Result<StepResult> {
        let overrides = self.inner.workflow.overrides_for(overrides_key);
        let scope = RunScope::new(ctx, &self.inner.workflow_value);
        let prompt = interpolate(
            text,
            &scope,
            &self.cancel,
            overrides.exit_on_error.unwrap_or(true),
        )
        .await?;
        let response = self.prompt_turn(ctx, prompt, &overrides, Vec::new()).await?;
        Ok(StepResult::text(response, 0))
    }

    async fn prompt_turn(
        &self,
        ctx: &ContextStore,
        prompt: String,
        overrides: &StepOverrides,
        tools: Vec<ToolDefinition>,
    ) -> Result<String> {
        let model = overrides
            .model
            .clone()
            .or_else(|| self.inner.workflow.doc.model.clone())
            .ok_or_else(|| Error::Config("no model configured".to_string()))?;
        let driver = ChatDriver::new(self.inner.client.as_ref(), &self.inner.dispatcher);
        driver
            .prompt_turn(
                ctx,
                prompt,
                &TurnOptions {
                    params: ChatParams {
                        model,
                        temperature: overrides.temperature,
                        json_mode: overrides.json.unwrap_or(false),
                        tools,
                    },
                    max_tool_loops: overrides.max_tool_loops.unwrap_or(DEFAULT_MAX_TOOL_LOOPS),
                    use_cache: overrides.cache.unwrap_or(true),
                },
                &self.cancel,
            )
            .await
    }

    /// Shell step: stdout is the result; the exit status is always
    /// recorded.
    async fn shell_step(
        &self,
        ctx: &ContextStore,
        command: &str,
        overrides_key: &str,
    ) -> Result<StepResult> {
        let overrides = self.inner.workflow.overrides_for(overrides_key);
        let scope = RunScope::new(ctx, &self.inner.workflow_value);
        let command = interpolate_exprs(command, &scope)?;
        let outcome = shell::run(&command, &self.cancel).await?;

        if !outcome.success() && overrides.exit_on_error.unwrap_or(true) {
            return Err(Error::Shell {
                command,
                status: outcome.status,
                stderr: outcome.stderr,
            });
        }

        let structured = if outcome.success() {
            None
        } else {
            // Failure carried as a result: the workflow continues and later
            // steps can inspect the status.
            Some(serde_json::json!({
                "output": outcome.stdout,
                "exit_status": outcome.status,
            }))
        };
        Ok(StepResult {
            raw_response: outcome.stdout,
            structured,
            exit_status: Some(outcome.status),
            duration_ms: 0,
        })
    }

    /// Parallel group: one worker per sibling, shared context, buffered
    /// transcripts flushed in finish order, first fatal error cancels the
    /// rest.
    async fn parallel_group(
        &self,
        ctx: &ContextStore,
        branches: &[Step],
    ) -> Result<StepResult> {
        let group = ctx.parallel_scope();
        let group_cancel = self.cancel.child_token();
        let mut set: JoinSet<(usize, ContextStore, Result<Value>)> = JoinSet::new();

        for (index, branch) in branches.iter().enumerate() {
            let sibling = group.sibling();
            let worker = self.with_cancel(group_cancel.clone());
            let branch = branch.clone();
            set.spawn(async move {
                let result = worker.run_one(&sibling, &branch, index, false).await;
                (index, sibling, result)
            });
        }

        let mut results: Vec<Value> = vec![Value::Null; branches.len()];
        let mut first_error: Option<Error> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, sibling, result)) => {
                    // Flush in finish order keeps each sibling's messages
                    // contiguous.
                    sibling.join_transcript();
                    match result {
                        Ok(value) => results[index] = value,
                        Err(err) => {
                            if first_error.is_none() {
                                group_cancel.cancel();
                                first_error = Some(err);
                            }
                        }
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        group_cancel.cancel();
                        first_error =
                            Some(Error::Internal(format!("parallel worker died: {join_err}")));
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        group.commit();
        Ok(value_result(Value::Array(results)))
    }
}

/// Wrap a control-flow or procedural value as a step result.
fn value_result(value: Value) -> StepResult {
    StepResult {
        raw_response: value_to_string(&value),
        structured: Some(value),
        exit_status: None,
        duration_ms: 0,
    }
}
