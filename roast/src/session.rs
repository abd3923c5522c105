//! Session persistence and replay.
//!
//! After every top-level step the engine writes
//! `./.roast/sessions/<workflow_name>/<timestamp>/NNNN_<step_name>.json`
//! holding the step record and the transcript up to that point, plus a
//! `session.json` with run metadata. Each step is a separate file so partial
//! runs stay inspectable. Sessions are immutable once written; a replay
//! starts a fresh session.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::step::StepResult;

/// Default session root, relative to the working directory.
pub const SESSIONS_ROOT: &str = ".roast/sessions";

/// Run metadata stored in `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Unique id of this run.
    pub workflow_id: Uuid,
    /// Workflow name.
    pub workflow_name: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// SHA-256 prefix of the target value, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_fingerprint: Option<String>,
    /// SHA-256 over the ordered top-level step names.
    pub steps_hash: String,
}

/// One persisted step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Zero-based top-level step index.
    pub step_index: usize,
    /// Step name.
    pub name: String,
    /// When the step started.
    pub started_at: DateTime<Utc>,
    /// When the step finished.
    pub finished_at: DateTime<Utc>,
    /// The step result.
    pub result: StepResult,
    /// Transcript snapshot after the step.
    pub transcript: Vec<Message>,
}

/// Writer for one session directory.
#[derive(Debug)]
pub struct SessionRecorder {
    dir: PathBuf,
}

impl SessionRecorder {
    /// Create a new session directory under `root` and write its metadata.
    pub async fn create(
        root: &Path,
        workflow_name: &str,
        steps_hash: String,
        target_fingerprint: Option<String>,
    ) -> Result<Self> {
        let started_at = Utc::now();
        let timestamp = started_at.format("%Y%m%d_%H%M%S_%3f").to_string();
        let dir = root.join(workflow_name).join(timestamp);
        tokio::fs::create_dir_all(&dir).await?;

        let meta = SessionMeta {
            workflow_id: Uuid::new_v4(),
            workflow_name: workflow_name.to_string(),
            started_at,
            target_fingerprint,
            steps_hash,
        };
        let text = serde_json::to_string_pretty(&meta)?;
        tokio::fs::write(dir.join("session.json"), text).await?;
        Ok(Self { dir })
    }

    /// The session id: the timestamp directory name.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one step record as its own file.
    pub async fn record_step(&self, record: &StepRecord) -> Result<()> {
        let file = format!(
            "{:04}_{}.json",
            record.step_index,
            sanitize(&record.name)
        );
        let text = serde_json::to_string_pretty(record)?;
        tokio::fs::write(self.dir.join(file), text).await?;
        Ok(())
    }
}

/// State reconstructed from a persisted session prefix.
#[derive(Debug, Clone)]
pub struct ReplayState {
    /// Output Map values for the replayed steps.
    pub outputs: Map<String, Value>,
    /// Transcript up to (not including) the resumed step.
    pub transcript: Vec<Message>,
    /// Top-level index of the step to resume from.
    pub resume_index: usize,
}

/// Locate the newest session directory for a workflow, or a specific one by
/// id.
pub fn find_session(
    root: &Path,
    workflow_name: &str,
    session_id: Option<&str>,
) -> Result<PathBuf> {
    let base = root.join(workflow_name);
    if let Some(id) = session_id {
        let dir = base.join(id);
        if dir.is_dir() {
            return Ok(dir);
        }
        return Err(Error::ReplayMismatch(format!(
            "no session '{id}' for workflow '{workflow_name}'"
        )));
    }

    let mut newest: Option<PathBuf> = None;
    let entries = std::fs::read_dir(&base).map_err(|_| {
        Error::ReplayMismatch(format!("no sessions recorded for workflow '{workflow_name}'"))
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir()
            && newest
                .as_ref()
                .is_none_or(|n| path.file_name() > n.file_name())
        {
            newest = Some(path);
        }
    }
    newest.ok_or_else(|| {
        Error::ReplayMismatch(format!("no sessions recorded for workflow '{workflow_name}'"))
    })
}

/// Rebuild Output Map and transcript from the records strictly before
/// `target_step`.
///
/// `current_hash` is the running workflow's step hash; a divergence from the
/// recorded one makes the prefix unsound and aborts with `ReplayMismatch`.
pub fn load_prefix(
    session_dir: &Path,
    target_step: &str,
    current_hash: &str,
) -> Result<ReplayState> {
    let meta_text = std::fs::read_to_string(session_dir.join("session.json"))
        .map_err(|e| Error::ReplayMismatch(format!("unreadable session metadata: {e}")))?;
    let meta: SessionMeta = serde_json::from_str(&meta_text)
        .map_err(|e| Error::ReplayMismatch(format!("invalid session metadata: {e}")))?;
    if meta.steps_hash != current_hash {
        return Err(Error::ReplayMismatch(format!(
            "workflow definition changed since session {} was recorded",
            session_dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(session_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.extension().is_some_and(|e| e == "json")
                && p.file_name().is_some_and(|n| n != "session.json")
        })
        .collect();
    files.sort();

    let mut state = ReplayState {
        outputs: Map::new(),
        transcript: Vec::new(),
        resume_index: 0,
    };
    for file in files {
        let text = std::fs::read_to_string(&file)?;
        let record: StepRecord = serde_json::from_str(&text)
            .map_err(|e| Error::ReplayMismatch(format!("invalid step record: {e}")))?;
        if record.name == target_step {
            state.resume_index = record.step_index;
            return Ok(state);
        }
        state.resume_index = record.step_index + 1;
        state
            .outputs
            .insert(record.name.clone(), record.result.value());
        // Each record snapshots the full transcript; the last one wins.
        state.transcript = record.transcript;
    }
    Ok(state)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
