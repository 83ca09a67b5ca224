//! Variable substitution for step `params`, another externally-injected
//! concern (spec §4.8: "the core invokes a supplied substitution function
//! before dispatch; unresolved references fail with `InvalidParameter`").

use crate::env::{resolve_path, ExecutionEnv};
use regex::Regex;
use switchboard_shared::error::{SwitchboardError, SwitchboardResult};

pub trait VariableSubstituter: Send + Sync + std::fmt::Debug {
    fn substitute(&self, params: &serde_json::Value, env: &ExecutionEnv) -> SwitchboardResult<serde_json::Value>;
}

/// Resolves `{{variables.x}}` / `{{result[n].field}}` placeholders. A
/// string consisting of exactly one placeholder is replaced with the
/// resolved value's native JSON type; a string with embedded placeholders
/// among other text is replaced textually.
#[derive(Debug)]
pub struct DefaultVariableSubstituter {
    placeholder: Regex,
}

impl Default for DefaultVariableSubstituter {
    fn default() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("static regex is valid"),
        }
    }
}

impl VariableSubstituter for DefaultVariableSubstituter {
    fn substitute(&self, params: &serde_json::Value, env: &ExecutionEnv) -> SwitchboardResult<serde_json::Value> {
        self.substitute_value(params, env)
    }
}

impl DefaultVariableSubstituter {
    fn substitute_value(&self, value: &serde_json::Value, env: &ExecutionEnv) -> SwitchboardResult<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => self.substitute_string(s, env),
            serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.substitute_value(item, env))
                    .collect::<SwitchboardResult<Vec<_>>>()?,
            )),
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.substitute_value(v, env)?);
                }
                Ok(serde_json::Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn substitute_string(&self, s: &str, env: &ExecutionEnv) -> SwitchboardResult<serde_json::Value> {
        let trimmed = s.trim();
        if let (true, Some(inner)) = (
            self.placeholder.find_iter(s).count() == 1,
            trimmed.strip_prefix("{{").and_then(|t| t.strip_suffix("}}")),
        ) {
            let path = inner.trim();
            let resolved = resolve_path(path, env).ok_or_else(|| {
                SwitchboardError::InvalidParameter(format!("unresolved variable reference: {path}"))
            })?;
            return Ok(resolved);
        }

        if !s.contains("{{") {
            return Ok(serde_json::Value::String(s.to_string()));
        }

        let mut result = String::with_capacity(s.len());
        let mut last = 0;
        for caps in self.placeholder.captures_iter(s) {
            let m = caps.get(0).unwrap();
            result.push_str(&s[last..m.start()]);
            let path = caps.get(1).unwrap().as_str().trim();
            let resolved = resolve_path(path, env).ok_or_else(|| {
                SwitchboardError::InvalidParameter(format!("unresolved variable reference: {path}"))
            })?;
            match resolved {
                serde_json::Value::String(inner) => result.push_str(&inner),
                other => result.push_str(&other.to_string()),
            }
            last = m.end();
        }
        result.push_str(&s[last..]);
        Ok(serde_json::Value::String(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_shared::status::TaskStepResult;
    use switchboard_shared::value::{Value, ValueMap};

    #[test]
    fn whole_field_placeholder_preserves_type() {
        let mut vars = ValueMap::new();
        vars.insert("count".to_string(), Value::Number(3.0));
        let env = ExecutionEnv {
            variables: &vars,
            previous_results: &[],
        };
        let params = serde_json::json!({"n": "{{variables.count}}"});
        let out = DefaultVariableSubstituter::default().substitute(&params, &env).unwrap();
        assert_eq!(out["n"], serde_json::json!(3.0));
    }

    #[test]
    fn embedded_placeholder_is_textual() {
        let mut vars = ValueMap::new();
        vars.insert("name".to_string(), Value::from("Ada"));
        let env = ExecutionEnv {
            variables: &vars,
            previous_results: &[],
        };
        let params = serde_json::json!({"greeting": "Hello, {{variables.name}}!"});
        let out = DefaultVariableSubstituter::default().substitute(&params, &env).unwrap();
        assert_eq!(out["greeting"], serde_json::json!("Hello, Ada!"));
    }

    #[test]
    fn result_reference_resolves_nested_field() {
        let vars = ValueMap::new();
        let results = vec![TaskStepResult::success(
            "s0",
            serde_json::json!({"sentiment": "positive"}),
            "ok",
        )];
        let env = ExecutionEnv {
            variables: &vars,
            previous_results: &results,
        };
        let params = serde_json::json!({"prior": "{{result[0].result}}"});
        let out = DefaultVariableSubstituter::default().substitute(&params, &env).unwrap();
        assert_eq!(out["prior"], serde_json::json!({"sentiment": "positive"}));
    }

    #[test]
    fn unresolved_reference_is_invalid_parameter() {
        let vars = ValueMap::new();
        let env = ExecutionEnv {
            variables: &vars,
            previous_results: &[],
        };
        let params = serde_json::json!({"n": "{{variables.missing}}"});
        let err = DefaultVariableSubstituter::default().substitute(&params, &env).unwrap_err();
        assert!(matches!(err, SwitchboardError::InvalidParameter(_)));
    }

    #[test]
    fn no_placeholder_passes_through() {
        let vars = ValueMap::new();
        let env = ExecutionEnv {
            variables: &vars,
            previous_results: &[],
        };
        let params = serde_json::json!({"text": "hello"});
        let out = DefaultVariableSubstituter::default().substitute(&params, &env).unwrap();
        assert_eq!(out, params);
    }
}
