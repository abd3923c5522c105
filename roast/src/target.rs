//! Target resolution.
//!
//! A workflow optionally operates on a target resource: a path, a glob (one
//! run per match), a directory, a URL, a JSON fetch specification, or a
//! `$(cmd)` whose stdout lines are paths. Resolution happens once before
//! execution; each resolved value becomes `workflow.file` for its run.

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::expr::as_shell;
use crate::shell;
use crate::workflow::yaml_to_json;

/// A JSON fetch specification: `{url, options: {method, headers, body}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSpec {
    /// URL to fetch.
    pub url: String,
    /// Request options.
    #[serde(default)]
    pub options: FetchOptions,
}

/// Options of a [`FetchSpec`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchOptions {
    /// HTTP method (default GET).
    #[serde(default)]
    pub method: Option<String>,
    /// Request headers.
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: Option<String>,
}

/// Resolve the `target` document value into one resource string per run.
///
/// An absent target yields a single targetless run (`None`).
pub async fn resolve(
    target: Option<&serde_yaml::Value>,
    cancel: &CancellationToken,
) -> Result<Vec<Option<String>>> {
    let Some(target) = target else {
        return Ok(vec![None]);
    };

    match target {
        serde_yaml::Value::String(text) => resolve_string(text, cancel).await,
        serde_yaml::Value::Mapping(_) => {
            let json = yaml_to_json(target.clone())?;
            let spec: FetchSpec = serde_json::from_value(json)
                .map_err(|e| Error::Config(format!("invalid target fetch spec: {e}")))?;
            let body = fetch(&spec).await?;
            Ok(vec![Some(body)])
        }
        other => Err(Error::Config(format!("unsupported target: {other:?}"))),
    }
}

async fn resolve_string(
    text: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Option<String>>> {
    // `$(cmd)`: one run per stdout line.
    if let Some(command) = as_shell(text) {
        let outcome = shell::run_checked(command, cancel).await?;
        let lines = shell::split_lines(&outcome.stdout);
        if lines.is_empty() {
            return Err(Error::Config(format!(
                "target command `{command}` produced no paths"
            )));
        }
        return Ok(lines.into_iter().map(Some).collect());
    }

    // URLs are opaque string resources.
    if text.starts_with("http://") || text.starts_with("https://") {
        return Ok(vec![Some(text.to_string())]);
    }

    // Globs expand to one run per match.
    if text.contains('*') || text.contains('?') || text.contains('[') {
        let mut matches = Vec::new();
        let paths = glob::glob(text)
            .map_err(|e| Error::Config(format!("invalid target glob `{text}`: {e}")))?;
        for path in paths {
            let path =
                path.map_err(|e| Error::Config(format!("unreadable glob match: {e}")))?;
            matches.push(Some(path.to_string_lossy().into_owned()));
        }
        if matches.is_empty() {
            return Err(Error::Config(format!("target glob `{text}` matched nothing")));
        }
        return Ok(matches);
    }

    // Plain path or directory: a single run.
    Ok(vec![Some(text.to_string())])
}

/// Perform the HTTP request of a fetch-spec target. The response body is the
/// resource.
async fn fetch(spec: &FetchSpec) -> Result<String> {
    let client = reqwest::Client::new();
    let method = spec
        .options
        .method
        .as_deref()
        .unwrap_or("GET")
        .parse::<reqwest::Method>()
        .map_err(|_| Error::Config(format!("invalid fetch method for {}", spec.url)))?;

    let mut request = client.request(method, &spec.url);
    for (key, value) in &spec.options.headers {
        request = request.header(key, value);
    }
    if let Some(body) = &spec.options.body {
        request = request.body(body.clone());
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::Config(format!("target fetch failed: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::Config(format!(
            "target fetch returned {} for {}",
            response.status(),
            spec.url
        )));
    }
    response
        .text()
        .await
        .map_err(|e| Error::Config(format!("target fetch failed: {e}")))
}

/// Short SHA-256 fingerprint of a resolved target, for session metadata.
#[must_use]
pub fn fingerprint(target: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    format!(
        "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5]
    )
}

/// Convenience: the target as a JSON value for the workflow object.
#[must_use]
pub fn as_value(target: Option<&str>) -> Value {
    target.map_or(Value::Null, |t| Value::String(t.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_target_is_one_targetless_run() {
        let runs = resolve(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(runs, vec![None]);
    }

    #[tokio::test]
    async fn plain_path_and_url_are_single_runs() {
        let cancel = CancellationToken::new();
        let path = serde_yaml::Value::String("src/main.rs".into());
        assert_eq!(
            resolve(Some(&path), &cancel).await.unwrap(),
            vec![Some("src/main.rs".to_string())]
        );

        let url = serde_yaml::Value::String("https://example.com/data".into());
        assert_eq!(
            resolve(Some(&url), &cancel).await.unwrap(),
            vec![Some("https://example.com/data".to_string())]
        );
    }

    #[tokio::test]
    async fn shell_target_yields_one_run_per_line() {
        let cancel = CancellationToken::new();
        let target = serde_yaml::Value::String("$(printf 'a.rs\\nb.rs\\n')".into());
        assert_eq!(
            resolve(Some(&target), &cancel).await.unwrap(),
            vec![Some("a.rs".to_string()), Some("b.rs".to_string())]
        );
    }

    #[tokio::test]
    async fn glob_target_expands() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.txt"), "").unwrap();
        std::fs::write(dir.path().join("two.txt"), "").unwrap();
        std::fs::write(dir.path().join("skip.md"), "").unwrap();

        let pattern = format!("{}/*.txt", dir.path().display());
        let target = serde_yaml::Value::String(pattern);
        let mut runs = resolve(Some(&target), &CancellationToken::new())
            .await
            .unwrap();
        runs.sort();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].as_deref().unwrap().ends_with("one.txt"));
    }

    #[tokio::test]
    async fn empty_glob_is_a_config_error() {
        let target = serde_yaml::Value::String("/nonexistent_dir_xyz/*.rs".into());
        let err = resolve(Some(&target), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint("a.rs"), fingerprint("a.rs"));
        assert_ne!(fingerprint("a.rs"), fingerprint("b.rs"));
        assert_eq!(fingerprint("x").len(), 12);
    }
}
