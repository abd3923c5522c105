//! End-to-end tests for the workflow engine.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use roast::prelude::*;
use roast::session;

fn workflow_in(dir: &Path, yaml: &str) -> Workflow {
    let doc = WorkflowDoc::from_yaml(yaml).unwrap();
    Workflow::compile(doc, dir.to_path_buf()).unwrap()
}

fn workflow(yaml: &str) -> Workflow {
    workflow_in(Path::new("."), yaml)
}

fn write_prompt_dir(base: &Path, name: &str, prompt: &str, output_template: Option<&str>) {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("prompt.md"), prompt).unwrap();
    if let Some(template) = output_template {
        std::fs::write(dir.join("output.txt"), template).unwrap();
    }
}

/// A tool that counts its underlying invocations.
#[derive(Debug, Default)]
struct CountingEcho {
    calls: AtomicUsize,
}

#[async_trait]
impl Tool for CountingEcho {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> String {
        "Echoes back the input message.".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }

    async fn call(&self, args: Value) -> ToolResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(args["message"].clone())
    }
}

#[tokio::test]
async fn prompt_directory_step_renders_prompt_and_output_template() {
    let dir = tempfile::tempdir().unwrap();
    write_prompt_dir(
        dir.path(),
        "analyze",
        "Analyze {{workflow.file}}",
        Some("== {{response}} =="),
    );

    let wf = workflow_in(dir.path(), "name: demo\nmodel: m1\nsteps: [analyze]\n");
    let client = Arc::new(MockClient::with_texts(vec!["insight"]));
    let exec = Executor::builder(wf, Arc::clone(&client) as Arc<dyn ChatClient>)
        .target(Some("src/main.rs".to_string()))
        .build()
        .unwrap();

    let out = exec.run().await.unwrap();
    assert_eq!(out, json!("== insight =="));
    assert_eq!(client.user_messages(), vec!["Analyze src/main.rs"]);
}

#[tokio::test]
async fn procedural_step_takes_precedence_over_prompt_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_prompt_dir(dir.path(), "analyze", "never used", None);

    let mut procedures = StepRegistry::new();
    procedures.register_fn("analyze", |sc: StepContext| async move {
        Ok(json!({"target": sc.workflow["file"], "source": "procedural"}))
    });

    let wf = workflow_in(dir.path(), "name: demo\nmodel: m1\nsteps: [analyze]\n");
    let client = Arc::new(MockClient::with_texts(vec!["unused"]));
    let exec = Executor::builder(wf, Arc::clone(&client) as Arc<dyn ChatClient>)
        .procedures(procedures)
        .target(Some("a.rs".to_string()))
        .build()
        .unwrap();

    let out = exec.run().await.unwrap();
    assert_eq!(out, json!({"target": "a.rs", "source": "procedural"}));
    assert_eq!(client.call_count(), 0);
}

#[tokio::test]
async fn prompt_step_drives_the_tool_loop() {
    let dir = tempfile::tempdir().unwrap();
    write_prompt_dir(dir.path(), "helper", "Use the echo tool", None);

    let mut tools = ToolRegistry::new();
    tools.add(CountingEcho::default());

    let wf = workflow_in(
        dir.path(),
        "name: demo\nmodel: m1\ntools: [echo]\nsteps: [helper]\n",
    );
    let client = Arc::new(MockClient::new(vec![
        MockReply::ToolCalls(vec![ToolCall::new("c1", "echo", json!({"message": "ping"}))]),
        MockReply::Text("pong".into()),
    ]));
    let exec = Executor::builder(wf, Arc::clone(&client) as Arc<dyn ChatClient>)
        .tools(tools)
        .build()
        .unwrap();

    let out = exec.run().await.unwrap();
    assert_eq!(out, json!("pong"));

    // The step offered exactly the enabled tools.
    assert_eq!(client.calls()[0].tool_names, vec!["echo"]);
    // Second completion saw user, assistant(tool_calls), tool.
    let roles: Vec<Role> = client.calls()[1].messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
    assert_eq!(client.calls()[1].messages[2].content, "ping");
}

#[tokio::test]
async fn equal_tool_params_invoke_once_per_run() {
    let dir = tempfile::tempdir().unwrap();
    write_prompt_dir(dir.path(), "first", "call it", None);
    write_prompt_dir(dir.path(), "second", "call it again", None);

    let echo = Arc::new(CountingEcho::default());
    let mut tools = ToolRegistry::new();
    tools.add_arc(Arc::clone(&echo) as Arc<dyn Tool>);

    let wf = workflow_in(
        dir.path(),
        "name: demo\nmodel: m1\ntools: [echo]\nsteps: [first, second]\n",
    );
    // Both steps call the tool with normalize-equal parameters.
    let client = Arc::new(MockClient::new(vec![
        MockReply::ToolCalls(vec![ToolCall::new("c1", "echo", json!({"n": 1.0, "m": "x"}))]),
        MockReply::Text("one".into()),
        MockReply::ToolCalls(vec![ToolCall::new("c2", "echo", json!({"m": "x", "n": 1}))]),
        MockReply::Text("two".into()),
    ]));
    let exec = Executor::builder(wf, Arc::clone(&client) as Arc<dyn ChatClient>)
        .tools(tools)
        .build()
        .unwrap();

    exec.run().await.unwrap();
    assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn outputs_fold_in_step_order() {
    let wf = workflow(
        "name: demo\nmodel: m1\nsteps:\n  - s1: $(printf one)\n  - s2: $(printf two)\n  - s2b: $(printf '%s-more' {{output['s2']}})\n  - \"{{json(output)}}\"\n",
    );
    let client = Arc::new(MockClient::with_texts(vec!["done"]));
    let exec = Executor::builder(wf, Arc::clone(&client) as Arc<dyn ChatClient>)
        .build()
        .unwrap();

    exec.run().await.unwrap();
    assert_eq!(
        client.user_messages(),
        vec![r#"{"s1":"one","s2":"two","s2b":"two-more"}"#]
    );
}

#[tokio::test]
async fn session_records_one_file_per_step() {
    let session_root = tempfile::tempdir().unwrap();
    let wf = workflow("name: demo\nmodel: m1\nsteps:\n  - s1: $(printf one)\n  - s2: \"Summarize {{output['s1']}}\"\n");
    let recorder = SessionRecorder::create(
        session_root.path(),
        &wf.doc.name,
        wf.steps_hash(),
        None,
    )
    .await
    .unwrap();
    let session_dir = recorder.dir().to_path_buf();

    let client = Arc::new(MockClient::with_texts(vec!["a summary"]));
    let exec = Executor::builder(wf, Arc::clone(&client) as Arc<dyn ChatClient>)
        .session(recorder)
        .build()
        .unwrap();
    exec.run().await.unwrap();

    let mut files: Vec<String> = std::fs::read_dir(&session_dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["0000_s1.json", "0001_s2.json", "session.json"]);

    // Step records snapshot the transcript as of that step.
    let record: StepRecord = serde_json::from_str(
        &std::fs::read_to_string(session_dir.join("0001_s2.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(record.step_index, 1);
    assert_eq!(record.result.raw_response, "a summary");
    assert_eq!(record.transcript.len(), 2);
}

#[tokio::test]
async fn replay_resumes_with_byte_identical_prefix() {
    let session_root = tempfile::tempdir().unwrap();
    let yaml = "name: demo\nmodel: m1\nsteps:\n  - s1: $(printf one)\n  - s2: $(printf two)\n  - s3: \"Summarize {{output['s1']}}\"\n";

    // Original run.
    let wf = workflow(yaml);
    let recorder =
        SessionRecorder::create(session_root.path(), &wf.doc.name, wf.steps_hash(), None)
            .await
            .unwrap();
    let client = Arc::new(MockClient::with_texts(vec!["original summary"]));
    Executor::builder(wf, Arc::clone(&client) as Arc<dyn ChatClient>)
        .session(recorder)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    // Replay from s3: the prefix must match the original run exactly.
    let wf = workflow(yaml);
    let dir = session::find_session(session_root.path(), "demo", None).unwrap();
    let state = session::load_prefix(&dir, "s3", &wf.steps_hash()).unwrap();
    assert_eq!(state.resume_index, 2);
    assert_eq!(state.outputs.get("s1"), Some(&json!("one")));
    assert_eq!(state.outputs.get("s2"), Some(&json!("two")));

    let client2 = Arc::new(MockClient::with_texts(vec!["replayed summary"]));
    let out = Executor::builder(wf, Arc::clone(&client2) as Arc<dyn ChatClient>)
        .replay(state)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(out, json!("replayed summary"));
    // Only the resumed step ran, and it saw the replayed output map.
    assert_eq!(client2.call_count(), 1);
    assert_eq!(client2.user_messages(), vec!["Summarize one"]);
}

#[tokio::test]
async fn replay_aborts_on_changed_step_list() {
    let session_root = tempfile::tempdir().unwrap();
    let wf = workflow("name: demo\nmodel: m1\nsteps:\n  - s1: $(printf one)\n");
    let recorder =
        SessionRecorder::create(session_root.path(), &wf.doc.name, wf.steps_hash(), None)
            .await
            .unwrap();
    let client = Arc::new(MockClient::with_texts(vec![]));
    Executor::builder(wf, client as Arc<dyn ChatClient>)
        .session(recorder)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    let changed = workflow("name: demo\nmodel: m1\nsteps:\n  - renamed: $(printf one)\n");
    let dir = session::find_session(session_root.path(), "demo", None).unwrap();
    let err = session::load_prefix(&dir, "renamed", &changed.steps_hash()).unwrap_err();
    assert!(matches!(err, Error::ReplayMismatch(_)));
}

#[tokio::test]
async fn parallel_siblings_have_contiguous_transcript_blocks() {
    let session_root = tempfile::tempdir().unwrap();
    let wf = workflow(
        "name: demo\nmodel: m1\nsteps:\n  - - left: \"left prompt\"\n    - right: \"right prompt\"\n  - tail: $(printf done)\n",
    );
    let recorder =
        SessionRecorder::create(session_root.path(), &wf.doc.name, wf.steps_hash(), None)
            .await
            .unwrap();
    let session_dir = recorder.dir().to_path_buf();
    let client = Arc::new(MockClient::with_texts(vec!["reply A", "reply B"]));
    Executor::builder(wf, client as Arc<dyn ChatClient>)
        .session(recorder)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap();

    // The final transcript is persisted with the tail step's record.
    let record: StepRecord = serde_json::from_str(
        &std::fs::read_to_string(session_dir.join("0001_tail.json")).unwrap(),
    )
    .unwrap();
    let transcript = record.transcript;
    assert_eq!(transcript.len(), 4);
    // Each sibling's user message is immediately followed by its assistant
    // reply, whatever the finish order.
    for pair in transcript.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
    let users: Vec<&str> = transcript
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    assert!(users.contains(&"left prompt"));
    assert!(users.contains(&"right prompt"));
}

#[tokio::test]
async fn parallel_failure_cancels_siblings_and_reports_first_error() {
    let session_root = tempfile::tempdir().unwrap();
    let wf = workflow(
        "name: demo\nmodel: m1\nsteps:\n  - pre: $(printf ok)\n  - - bad: $(exit 3)\n    - slow: $(sleep 5)\n",
    );
    let recorder =
        SessionRecorder::create(session_root.path(), &wf.doc.name, wf.steps_hash(), None)
            .await
            .unwrap();
    let session_dir = recorder.dir().to_path_buf();
    let client = Arc::new(MockClient::with_texts(vec![]));

    let started = std::time::Instant::now();
    let err = Executor::builder(wf, client as Arc<dyn ChatClient>)
        .session(recorder)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();

    // The slow sibling was cancelled rather than run to completion.
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
    assert!(matches!(err.root_cause(), Error::Shell { status: 3, .. }));
    assert!(err.to_string().contains("'bad'"));

    // Only the pre-group step was snapshotted.
    let mut files: Vec<String> = std::fs::read_dir(&session_dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["0000_pre.json", "session.json"]);
}

#[tokio::test]
async fn pre_cancelled_run_exits_with_cancellation() {
    let wf = workflow("name: demo\nmodel: m1\nsteps:\n  - s1: $(printf one)\n");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let client = Arc::new(MockClient::with_texts(vec![]));
    let err = Executor::builder(wf, client as Arc<dyn ChatClient>)
        .cancel_token(cancel)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn glob_target_produces_one_run_per_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "").unwrap();
    std::fs::write(dir.path().join("b.txt"), "").unwrap();

    let pattern = format!("{}/*.txt", dir.path().display());
    let spec = serde_yaml::Value::String(pattern);
    let runs = roast::target::resolve(Some(&spec), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);

    // Each run sees its own file as workflow.file.
    let mut seen = Vec::new();
    for run_target in runs {
        let wf = workflow("name: demo\nmodel: m1\nsteps:\n  - \"File is {{workflow.file}}\"\n");
        let client = Arc::new(MockClient::with_texts(vec!["ok"]));
        Executor::builder(wf, Arc::clone(&client) as Arc<dyn ChatClient>)
            .target(run_target)
            .build()
            .unwrap()
            .run()
            .await
            .unwrap();
        seen.extend(client.user_messages());
    }
    assert!(seen.iter().any(|m| m.ends_with("a.txt")));
    assert!(seen.iter().any(|m| m.ends_with("b.txt")));
}

#[tokio::test]
async fn fatal_tool_error_aborts_the_workflow() {
    let dir = tempfile::tempdir().unwrap();
    write_prompt_dir(dir.path(), "writer", "write the file", None);

    let restricted = dir.path().join("allowed");
    let mut tools = ToolRegistry::new();
    tools.add(roast::tools::WriteFileTool::new().with_restrict_path(&restricted));

    let wf = workflow_in(
        dir.path(),
        "name: demo\nmodel: m1\ntools: [write_file]\nsteps: [writer]\n",
    );
    let escape = dir.path().join("outside.txt");
    let client = Arc::new(MockClient::new(vec![MockReply::ToolCalls(vec![
        ToolCall::new(
            "c1",
            "write_file",
            json!({"path": escape.to_string_lossy(), "content": "x"}),
        ),
    ])]));
    let err = Executor::builder(wf, client as Arc<dyn ChatClient>)
        .tools(tools)
        .build()
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err.root_cause(), Error::Tool { .. }));
    assert!(!escape.exists());
}

#[test]
fn workspace_prelude_reexports_compile() {
    // Spot check that the embedding surface stays intact.
    let _ = DEFAULT_MAX_TOOL_LOOPS;
    let _: fn() -> ToolRegistry = builtin_registry;
}
