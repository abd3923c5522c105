//! Roast CLI: run declarative AI workflows.

#![allow(clippy::print_stdout, clippy::print_stderr)] // CLI program intentionally uses stdout

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

use roast::expr::value_to_string;
use roast::prelude::*;
use roast::session::{self, SESSIONS_ROOT};
use roast::target;

/// Roast, a declarative AI workflow runner
#[derive(Parser)]
#[command(name = "roast")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Execute(ExecuteArgs),

    /// Check a workflow document without running it
    Validate(ValidateArgs),
}

/// Arguments for the execute command
#[derive(Args)]
struct ExecuteArgs {
    /// Workflow document to run
    workflow: PathBuf,

    /// Target resource (path, glob, directory, URL, or $(cmd))
    target: Option<String>,

    /// Redirect final output to a file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Set workflow.concise
    #[arg(short, long)]
    concise: bool,

    /// Set workflow.verbose and stream per-step output
    #[arg(short, long)]
    verbose: bool,

    /// Resume from a persisted session: [session_id:]step_name
    #[arg(short, long, value_name = "STEP")]
    replay: Option<String>,

    /// Target override (takes precedence over the positional target)
    #[arg(short = 't', long = "target", value_name = "VALUE")]
    target_override: Option<String>,
}

/// Arguments for the validate command
#[derive(Args)]
struct ValidateArgs {
    /// Workflow document to check
    workflow: PathBuf,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "roast=info" } else { "roast=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Execute(args) => {
            init_tracing(args.verbose);
            execute(args).await
        }
        Commands::Validate(args) => {
            init_tracing(false);
            validate(args).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "workflow failed");
            eprintln!("error: {err}");
            if err.is_cancelled() {
                ExitCode::from(130)
            } else if err.is_config() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

async fn validate(args: ValidateArgs) -> Result<()> {
    let workflow = Workflow::load(&args.workflow).await?;
    println!(
        "{}: {} steps, ok",
        workflow.doc.name,
        workflow.steps.len()
    );
    Ok(())
}

async fn execute(args: ExecuteArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let workflow = Workflow::load(&args.workflow).await?;

    // CLI target overrides the document's.
    let override_value = args
        .target_override
        .or(args.target)
        .map(serde_yaml::Value::String);
    let target_spec = override_value.or_else(|| workflow.doc.target.clone());
    let runs = target::resolve(target_spec.as_ref(), &cancel).await?;

    if args.replay.is_some() && runs.len() > 1 {
        return Err(Error::Config(
            "replay requires a single-run target".to_string(),
        ));
    }

    let provider = workflow.doc.api_provider;
    let configured_token = workflow.resolve_api_token(&cancel).await?;
    let token = provider.resolve_token(configured_token.as_deref())?;
    let client: Arc<dyn ChatClient> = Arc::new(OpenAiClient::for_provider(provider, token));

    let sessions_root = PathBuf::from(SESSIONS_ROOT);
    let mut last_output = serde_json::Value::Null;

    for run_target in runs {
        let replay = match &args.replay {
            Some(spec) => Some(load_replay(&workflow, &sessions_root, spec)?),
            None => None,
        };

        let recorder = SessionRecorder::create(
            &sessions_root,
            &workflow.doc.name,
            workflow.steps_hash(),
            run_target.as_deref().map(target::fingerprint),
        )
        .await?;

        let executor = Executor::builder(workflow.clone(), Arc::clone(&client))
            .tools(builtin_registry())
            .target(run_target)
            .verbose(args.verbose)
            .concise(args.concise)
            .cancel_token(cancel.clone())
            .session(recorder);
        let executor = match replay {
            Some(state) => executor.replay(state),
            None => executor,
        };

        last_output = executor.build()?.run().await?;
    }

    let rendered = value_to_string(&last_output);
    match &args.output {
        Some(path) => tokio::fs::write(path, rendered).await?,
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Parse `[session_id:]step_name` and rebuild the session prefix.
fn load_replay(
    workflow: &Workflow,
    sessions_root: &std::path::Path,
    spec: &str,
) -> Result<ReplayState> {
    let (session_id, step_name) = match spec.split_once(':') {
        Some((id, step)) => (Some(id), step),
        None => (None, spec),
    };
    if step_name.trim().is_empty() {
        return Err(Error::Config("replay step name must not be empty".into()));
    }
    let dir = session::find_session(sessions_root, &workflow.doc.name, session_id)?;
    session::load_prefix(&dir, step_name, &workflow.steps_hash())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn execute_flags_parse() {
        let cli = Cli::parse_from([
            "roast", "execute", "wf.yml", "src/", "-o", "out.txt", "-c", "-v", "-r",
            "20260801_120000_000:analyze", "-t", "README.md",
        ]);
        let Commands::Execute(args) = cli.command else {
            panic!("expected execute");
        };
        assert_eq!(args.workflow, PathBuf::from("wf.yml"));
        assert_eq!(args.target.as_deref(), Some("src/"));
        assert_eq!(args.output, Some(PathBuf::from("out.txt")));
        assert!(args.concise);
        assert!(args.verbose);
        assert_eq!(args.replay.as_deref(), Some("20260801_120000_000:analyze"));
        assert_eq!(args.target_override.as_deref(), Some("README.md"));
    }
}
