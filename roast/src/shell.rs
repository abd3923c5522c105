//! Execution of `$(…)` shell commands.
//!
//! Commands run through `sh -c`. Standard output is the value of the
//! substitution or shell step; the exit status is always recorded. A shell
//! command is a suspension point: cancellation kills the child process.

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Outcome of a shell command.
#[derive(Debug, Clone)]
pub struct ShellOutcome {
    /// Captured standard output, unmodified.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit status (-1 when terminated by a signal).
    pub status: i32,
}

impl ShellOutcome {
    /// Whether the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run a command through the system shell, capturing output.
///
/// Returns the outcome regardless of exit status; callers decide whether a
/// non-zero status is a [`Error::Shell`] based on `exit_on_error`.
pub async fn run(command: &str, cancel: &CancellationToken) -> Result<ShellOutcome> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tokio::select! {
        output = cmd.output() => {
            let output = output?;
            Ok(ShellOutcome {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                status: output.status.code().unwrap_or(-1),
            })
        }
        () = cancel.cancelled() => Err(Error::Cancelled),
    }
}

/// Run a command and fail on non-zero exit.
pub async fn run_checked(command: &str, cancel: &CancellationToken) -> Result<ShellOutcome> {
    let outcome = run(command, cancel).await?;
    if outcome.success() {
        Ok(outcome)
    } else {
        Err(Error::Shell {
            command: command.to_string(),
            status: outcome.status,
            stderr: outcome.stderr,
        })
    }
}

/// Split command output into trimmed, non-empty lines.
///
/// This is the list form used by `each:` iterables and `$(cmd)` targets.
#[must_use]
pub fn split_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_status() {
        let cancel = CancellationToken::new();
        let out = run("printf 'hi\\n'", &cancel).await.unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.status, 0);
        assert!(out.success());
    }

    #[tokio::test]
    async fn nonzero_status_is_reported_not_raised() {
        let cancel = CancellationToken::new();
        let out = run("exit 3", &cancel).await.unwrap();
        assert_eq!(out.status, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn run_checked_raises_shell_failure() {
        let cancel = CancellationToken::new();
        let err = run_checked("echo oops >&2; exit 2", &cancel)
            .await
            .unwrap_err();
        match err {
            Error::Shell { status, stderr, .. } => {
                assert_eq!(status, 2);
                assert!(stderr.contains("oops"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run("sleep 5", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn split_lines_trims_and_drops_empties() {
        assert_eq!(split_lines("a\n  b  \n\n\nc\n"), vec!["a", "b", "c"]);
        assert!(split_lines("\n \n").is_empty());
    }
}
