//! Condition evaluation is an external concern the core merely invokes
//! (spec §4.3/§4.8). `ConditionEvaluator` is the injected seam;
//! `DefaultConditionEvaluator` covers the common truthy/equality cases so
//! the executor is usable without a caller-supplied one.

use crate::env::{resolve_path, ExecutionEnv};
use switchboard_shared::error::{SwitchboardError, SwitchboardResult};
use switchboard_shared::value::Value;

pub trait ConditionEvaluator: Send + Sync + std::fmt::Debug {
    /// Evaluate `expression` against `env`. Unresolved references fail with
    /// `InvalidParameter`, matching the substitution contract's error mode.
    fn evaluate(&self, expression: &str, env: &ExecutionEnv) -> SwitchboardResult<bool>;
}

/// Supports `<path>`, `!<path>` (negation), and `<path> == <literal>`,
/// where `<path>` is `variables.x` or `result[n].field`. Literals are
/// quoted strings, `true`/`false`, numbers, or bare words (compared as
/// strings).
#[derive(Debug, Default)]
pub struct DefaultConditionEvaluator;

impl ConditionEvaluator for DefaultConditionEvaluator {
    fn evaluate(&self, expression: &str, env: &ExecutionEnv) -> SwitchboardResult<bool> {
        let expr = expression.trim();
        let (negate, expr) = match expr.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, expr),
        };

        let outcome = if let Some((path, literal)) = expr.split_once("==") {
            let path = path.trim();
            let resolved = resolve_path(path, env).ok_or_else(|| {
                SwitchboardError::InvalidParameter(format!("unresolved condition reference: {path}"))
            })?;
            Value::from(resolved) == parse_literal(literal.trim())
        } else {
            let resolved = resolve_path(expr, env).ok_or_else(|| {
                SwitchboardError::InvalidParameter(format!("unresolved condition reference: {expr}"))
            })?;
            Value::from(resolved).is_truthy()
        };

        Ok(outcome ^ negate)
    }
}

fn parse_literal(s: &str) -> Value {
    if let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Value::String(inner.to_string())
    } else if s == "true" {
        Value::Bool(true)
    } else if s == "false" {
        Value::Bool(false)
    } else if let Ok(n) = s.parse::<f64>() {
        Value::Number(n)
    } else {
        Value::String(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_shared::value::ValueMap;

    fn env_with(variables: ValueMap) -> ExecutionEnv<'static> {
        // Leaked intentionally for the lifetime of a single test — tests
        // only run the evaluator once against this environment.
        let variables: &'static ValueMap = Box::leak(Box::new(variables));
        ExecutionEnv {
            variables,
            previous_results: &[],
        }
    }

    #[test]
    fn bare_path_is_truthy_check() {
        let mut vars = ValueMap::new();
        vars.insert("ready".to_string(), Value::Bool(true));
        let env = env_with(vars);
        assert!(DefaultConditionEvaluator.evaluate("variables.ready", &env).unwrap());
    }

    #[test]
    fn negation_inverts_result() {
        let mut vars = ValueMap::new();
        vars.insert("ready".to_string(), Value::Bool(false));
        let env = env_with(vars);
        assert!(DefaultConditionEvaluator.evaluate("!variables.ready", &env).unwrap());
    }

    #[test]
    fn equality_against_string_literal() {
        let mut vars = ValueMap::new();
        vars.insert("mode".to_string(), Value::from("chat"));
        let env = env_with(vars);
        assert!(DefaultConditionEvaluator
            .evaluate(r#"variables.mode == "chat""#, &env)
            .unwrap());
        assert!(!DefaultConditionEvaluator
            .evaluate(r#"variables.mode == "batch""#, &env)
            .unwrap());
    }

    #[test]
    fn unresolved_reference_is_invalid_parameter() {
        let env = env_with(ValueMap::new());
        let err = DefaultConditionEvaluator.evaluate("variables.missing", &env).unwrap_err();
        assert!(matches!(err, SwitchboardError::InvalidParameter(_)));
    }
}
