//! Coercion ladders for control-flow values.
//!
//! Condition, iterable, and case values share one resolution scheme:
//!
//! 1. `{{…}}`: evaluate the expression.
//! 2. `$(…)`: run the command (exit code for conditions, stdout otherwise).
//! 3. Bare `"true"`/`"false"`: literal, no evaluation.
//! 4. Anything else: the string names a previously executed step; the value
//!    comes from the Output Map.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextStore, RunScope};
use crate::error::Result;
use crate::expr::{self, as_expression, as_shell, truthy, value_to_string};
use crate::shell;

/// Resolve an `if`/`unless` condition value to a boolean.
pub async fn resolve_condition(
    raw: &str,
    ctx: &ContextStore,
    workflow: &Value,
    cancel: &CancellationToken,
) -> Result<bool> {
    if let Some(inner) = as_expression(raw) {
        let scope = RunScope::new(ctx, workflow);
        return Ok(truthy(&expr::evaluate(inner, &scope)?));
    }
    if let Some(command) = as_shell(raw) {
        // Exit code zero means true; the command is allowed to fail.
        let outcome = shell::run(command, cancel).await?;
        return Ok(outcome.success());
    }
    match raw.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        name => Ok(ctx.get(name).as_ref().is_some_and(truthy)),
    }
}

/// Resolve an `each` iterable to a list of element values.
///
/// Shell output splits into trimmed non-empty lines. Expression results
/// iterate arrays element-wise and split strings by line. A step-name
/// reference coerces list elements to strings, matching how loop bindings
/// are consumed.
pub async fn resolve_iterable(
    raw: &str,
    ctx: &ContextStore,
    workflow: &Value,
    cancel: &CancellationToken,
    exit_on_error: bool,
) -> Result<Vec<Value>> {
    if let Some(inner) = as_expression(raw) {
        let scope = RunScope::new(ctx, workflow);
        return Ok(spread(expr::evaluate(inner, &scope)?));
    }
    if let Some(command) = as_shell(raw) {
        let outcome = if exit_on_error {
            shell::run_checked(command, cancel).await?
        } else {
            shell::run(command, cancel).await?
        };
        return Ok(lines_as_values(&outcome.stdout));
    }
    match ctx.get(raw.trim()) {
        Some(Value::Array(items)) => Ok(items
            .iter()
            .map(|v| Value::String(value_to_string(v)))
            .collect()),
        Some(Value::String(s)) => Ok(lines_as_values(&s)),
        Some(other) => Ok(vec![Value::String(value_to_string(&other))]),
        None => Ok(Vec::new()),
    }
}

/// Resolve a `case` expression to the string compared against `when` keys.
pub async fn resolve_case_value(
    raw: &str,
    ctx: &ContextStore,
    workflow: &Value,
    cancel: &CancellationToken,
) -> Result<String> {
    if let Some(inner) = as_expression(raw) {
        let scope = RunScope::new(ctx, workflow);
        return Ok(value_to_string(&expr::evaluate(inner, &scope)?));
    }
    if let Some(command) = as_shell(raw) {
        let outcome = shell::run_checked(command, cancel).await?;
        return Ok(outcome.stdout.trim().to_string());
    }
    let name = raw.trim();
    Ok(ctx
        .get(name)
        .map_or_else(|| name.to_string(), |v| value_to_string(&v)))
}

fn spread(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::String(s) => lines_as_values(&s),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn lines_as_values(stdout: &str) -> Vec<Value> {
    shell::split_lines(stdout)
        .into_iter()
        .map(Value::String)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ContextStore {
        let ctx = ContextStore::default();
        ctx.record("passed", json!(true));
        ctx.record("empty", json!(""));
        ctx.record("files", json!(["a.rs", 2, "c.rs"]));
        ctx.record("listing", json!("x\ny\n"));
        ctx.record("kind", json!("bug"));
        ctx
    }

    #[tokio::test]
    async fn condition_ladder() {
        let ctx = ctx();
        let wf = json!({});
        let cancel = CancellationToken::new();

        // Expression rung.
        assert!(
            resolve_condition("{{1 + 1 == 2}}", &ctx, &wf, &cancel)
                .await
                .unwrap()
        );
        // Shell rung: exit code decides, stdout does not.
        assert!(
            resolve_condition("$(exit 0)", &ctx, &wf, &cancel)
                .await
                .unwrap()
        );
        assert!(
            !resolve_condition("$(exit 1)", &ctx, &wf, &cancel)
                .await
                .unwrap()
        );
        // Literal rung short-circuits without evaluation.
        assert!(resolve_condition("true", &ctx, &wf, &cancel).await.unwrap());
        assert!(!resolve_condition("false", &ctx, &wf, &cancel).await.unwrap());
        // Step-name rung: truthiness of the recorded output.
        assert!(
            resolve_condition("passed", &ctx, &wf, &cancel)
                .await
                .unwrap()
        );
        assert!(!resolve_condition("empty", &ctx, &wf, &cancel).await.unwrap());
        assert!(
            !resolve_condition("never_ran", &ctx, &wf, &cancel)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn iterable_ladder() {
        let ctx = ctx();
        let wf = json!({});
        let cancel = CancellationToken::new();

        let from_shell = resolve_iterable("$(printf 'a\\nb\\nc\\n')", &ctx, &wf, &cancel, true)
            .await
            .unwrap();
        assert_eq!(from_shell, vec![json!("a"), json!("b"), json!("c")]);

        let from_expr = resolve_iterable("{{output.files}}", &ctx, &wf, &cancel, true)
            .await
            .unwrap();
        assert_eq!(from_expr, vec![json!("a.rs"), json!(2), json!("c.rs")]);

        // Step-name rung coerces elements to strings.
        let from_name = resolve_iterable("files", &ctx, &wf, &cancel, true)
            .await
            .unwrap();
        assert_eq!(from_name, vec![json!("a.rs"), json!("2"), json!("c.rs")]);

        // Stored shell output splits by line.
        let from_listing = resolve_iterable("listing", &ctx, &wf, &cancel, true)
            .await
            .unwrap();
        assert_eq!(from_listing, vec![json!("x"), json!("y")]);

        assert!(
            resolve_iterable("never_ran", &ctx, &wf, &cancel, true)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn case_value_ladder() {
        let ctx = ctx();
        let wf = json!({});
        let cancel = CancellationToken::new();

        assert_eq!(
            resolve_case_value("{{output.kind}}", &ctx, &wf, &cancel)
                .await
                .unwrap(),
            "bug"
        );
        assert_eq!(
            resolve_case_value("$(printf feature)", &ctx, &wf, &cancel)
                .await
                .unwrap(),
            "feature"
        );
        assert_eq!(
            resolve_case_value("kind", &ctx, &wf, &cancel).await.unwrap(),
            "bug"
        );
        assert_eq!(
            resolve_case_value("literal", &ctx, &wf, &cancel)
                .await
                .unwrap(),
            "literal"
        );
    }
}
