//! `TaskContext` — per-task state (C2, spec §3/§4.2).

use crate::error::{SwitchboardError, SwitchboardResult};
use crate::value::{Value, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-task state: identifiers, metadata, variables, creation time.
///
/// `user_id` and `task_id` are immutable after construction and must be
/// non-empty (enforced in `new`). `created_at` is set once at construction.
/// `metadata` may only be replaced at construction; `variables` are mutable
/// for the lifetime of the task via `set_variable`.
///
/// The Worker owns one `TaskContext` for the duration of one task (spec §3,
/// "Ownership"); this type is therefore plain (no internal locking) — the
/// single-owner discipline is enforced by the executor, not by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    user_id: String,
    task_id: String,
    session_id: Option<String>,
    metadata: ValueMap,
    created_at: DateTime<Utc>,
    variables: ValueMap,
}

impl TaskContext {
    /// Construct a new task context. `user_id` and `task_id` must be
    /// non-empty; `created_at` is stamped at construction time.
    pub fn new(
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        session_id: Option<String>,
        metadata: Option<ValueMap>,
    ) -> SwitchboardResult<Self> {
        let user_id = user_id.into();
        let task_id = task_id.into();
        if user_id.is_empty() {
            return Err(SwitchboardError::InvalidParameter(
                "user_id must not be empty".to_string(),
            ));
        }
        if task_id.is_empty() {
            return Err(SwitchboardError::InvalidParameter(
                "task_id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            user_id,
            task_id,
            session_id,
            metadata: metadata.unwrap_or_default(),
            created_at: Utc::now(),
            variables: ValueMap::new(),
        })
    }

    /// Construct with an explicit creation timestamp — used when
    /// deserialising a previously-persisted context.
    pub fn with_created_at(
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        session_id: Option<String>,
        metadata: ValueMap,
        variables: ValueMap,
        created_at: DateTime<Utc>,
    ) -> SwitchboardResult<Self> {
        let mut ctx = Self::new(user_id, task_id, session_id, Some(metadata))?;
        ctx.created_at = created_at;
        ctx.variables = variables;
        Ok(ctx)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn metadata(&self) -> &ValueMap {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn variables(&self) -> &ValueMap {
        &self.variables
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn get_variable(&self, key: &str, default: Option<Value>) -> Option<Value> {
        self.variables.get(key).cloned().or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_ids() {
        assert!(TaskContext::new("", "t1", None, None).is_err());
        assert!(TaskContext::new("u1", "", None, None).is_err());
    }

    #[test]
    fn set_and_get_variable() {
        let mut ctx = TaskContext::new("u1", "t1", None, None).unwrap();
        ctx.set_variable("x", Value::from("hello"));
        assert_eq!(ctx.get_variable("x", None), Some(Value::from("hello")));
        assert_eq!(
            ctx.get_variable("missing", Some(Value::Bool(true))),
            Some(Value::Bool(true))
        );
        assert_eq!(ctx.get_variable("missing", None), None);
    }

    #[test]
    fn serialisation_round_trip_is_value_equal() {
        let mut ctx = TaskContext::new(
            "u1",
            "t1",
            Some("s1".to_string()),
            Some(ValueMap::from([("k".to_string(), Value::from("v"))])),
        )
        .unwrap();
        ctx.set_variable("x", Value::Number(1.0));

        let encoded = serde_json::to_string(&ctx).unwrap();
        let decoded: TaskContext = serde_json::from_str(&encoded).unwrap();
        assert_eq!(ctx, decoded);
    }

    #[test]
    fn created_at_is_iso8601_in_json() {
        let ctx = TaskContext::new("u1", "t1", None, None).unwrap();
        let encoded = serde_json::to_value(&ctx).unwrap();
        let created_at = encoded["created_at"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(created_at).is_ok());
    }

    #[test]
    fn ids_are_immutable_after_construction() {
        let ctx = TaskContext::new("u1", "t1", None, None).unwrap();
        assert_eq!(ctx.user_id(), "u1");
        assert_eq!(ctx.task_id(), "t1");
        // No setter exists for user_id/task_id — enforced at compile time.
    }
}
