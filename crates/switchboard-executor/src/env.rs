//! The evaluation environment condition/substitution expressions run
//! against, and the shared placeholder-path resolver both use (spec §4.8:
//! `env = {variables, previous_results}`).

use switchboard_shared::status::TaskStepResult;
use switchboard_shared::value::ValueMap;

/// Read-only view handed to `ConditionEvaluator`/`VariableSubstituter`.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionEnv<'a> {
    pub variables: &'a ValueMap,
    pub previous_results: &'a [TaskStepResult],
}

/// Resolve a documented placeholder path against `env`:
///
/// - `variables.<key>` — looks up `env.variables[<key>]`.
/// - `result[<n>].<field...>` — looks up field `<field...>` (dotted) on the
///   n-th prior `TaskStepResult`, serialised to JSON first.
///
/// Returns `None` for any path that doesn't resolve — the caller turns
/// that into `SwitchboardError::InvalidParameter` per spec §4.8 ("unresolved
/// references fail with InvalidParameter").
pub fn resolve_path(path: &str, env: &ExecutionEnv) -> Option<serde_json::Value> {
    if let Some(key) = path.strip_prefix("variables.") {
        return env.variables.get(key).cloned().map(Into::into);
    }
    if let Some(rest) = path.strip_prefix("result[") {
        let close = rest.find(']')?;
        let index: usize = rest[..close].parse().ok()?;
        let tail = &rest[close + 1..];
        let remainder = tail.strip_prefix('.').unwrap_or(tail);
        let step_result = env.previous_results.get(index)?;
        let mut value = serde_json::to_value(step_result).ok()?;
        if remainder.is_empty() {
            return Some(value);
        }
        for part in remainder.split('.') {
            value = value.get(part)?.clone();
        }
        return Some(value);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_shared::error::ErrorCode;
    use switchboard_shared::status::TaskStatus;
    use switchboard_shared::value::Value;

    #[test]
    fn resolves_variable_path() {
        let mut variables = ValueMap::new();
        variables.insert("x".to_string(), Value::from("hello"));
        let env = ExecutionEnv {
            variables: &variables,
            previous_results: &[],
        };
        assert_eq!(resolve_path("variables.x", &env), Some(serde_json::json!("hello")));
        assert_eq!(resolve_path("variables.missing", &env), None);
    }

    #[test]
    fn resolves_result_field_path() {
        let variables = ValueMap::new();
        let results = vec![TaskStepResult::success(
            "s0",
            serde_json::json!({"sentiment": "neutral"}),
            "ok",
        )];
        let env = ExecutionEnv {
            variables: &variables,
            previous_results: &results,
        };
        assert_eq!(
            resolve_path("result[0].result.sentiment", &env),
            Some(serde_json::json!("neutral"))
        );
        assert_eq!(resolve_path("result[1].result", &env), None);
    }

    #[test]
    fn resolves_whole_step_result() {
        let variables = ValueMap::new();
        let results = vec![TaskStepResult::failure("s0", TaskStatus::Failed, ErrorCode::NotFound, "missing")];
        let env = ExecutionEnv {
            variables: &variables,
            previous_results: &results,
        };
        let resolved = resolve_path("result[0]", &env).unwrap();
        assert_eq!(resolved["status"], "failed");
    }
}
