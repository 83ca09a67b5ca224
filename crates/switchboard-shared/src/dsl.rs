//! DSL step model (C3, spec §4.3). Pure data — parsing/condition evaluation
//! are external concerns the executor crate injects.

use crate::error::{SwitchboardError, SwitchboardResult};
use serde::{Deserialize, Serialize};

/// The four step shapes the interpreter (C8) recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Task,
    If,
    Sequence,
    Parallel,
}

/// A declarative step: type, optional condition, parameters, description.
///
/// `params` is never `None` on the wire — an absent `params` object
/// deserialises to an empty map, matching the spec's "params never null"
/// invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslStep {
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl DslStep {
    pub fn new(step_type: StepType) -> Self {
        Self {
            step_type,
            condition: None,
            description: String::new(),
            params: serde_json::Value::Object(Default::default()),
        }
    }

    /// Parse a step from an already-decoded JSON value (the parser that
    /// produces this value is out of scope — spec §4.3).
    pub fn from_value(value: serde_json::Value) -> SwitchboardResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| SwitchboardError::InvalidStep(format!("malformed step: {e}")))
    }

    fn params_object(&self) -> SwitchboardResult<&serde_json::Map<String, serde_json::Value>> {
        self.params
            .as_object()
            .ok_or_else(|| SwitchboardError::InvalidStep("params must be an object".to_string()))
    }

    /// For `task` steps: the `(service.method, params)` pair to dispatch.
    pub fn task_call(&self) -> SwitchboardResult<(String, serde_json::Value)> {
        if self.step_type != StepType::Task {
            return Err(SwitchboardError::InvalidStep(
                "task_call called on a non-task step".to_string(),
            ));
        }
        let obj = self.params_object()?;
        let task = obj
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SwitchboardError::InvalidStep("task step missing params.task".to_string()))?
            .to_string();
        let params = obj.get("params").cloned().unwrap_or(serde_json::json!({}));
        Ok((task, params))
    }

    /// For `if` steps: `(then, else)` subordinate steps. `else` is optional.
    pub fn if_branches(&self) -> SwitchboardResult<(DslStep, Option<DslStep>)> {
        if self.step_type != StepType::If {
            return Err(SwitchboardError::InvalidStep(
                "if_branches called on a non-if step".to_string(),
            ));
        }
        let obj = self.params_object()?;
        let then_step = obj
            .get("then")
            .cloned()
            .ok_or_else(|| SwitchboardError::InvalidStep("if step missing params.then".to_string()))
            .and_then(DslStep::from_value)?;
        let else_step = obj
            .get("else")
            .cloned()
            .map(DslStep::from_value)
            .transpose()?;
        Ok((then_step, else_step))
    }

    /// For `sequence` steps: the ordered child steps, and whether to abort
    /// on the first failure (default `true`).
    pub fn sequence_children(&self) -> SwitchboardResult<(Vec<DslStep>, bool)> {
        if self.step_type != StepType::Sequence {
            return Err(SwitchboardError::InvalidStep(
                "sequence_children called on a non-sequence step".to_string(),
            ));
        }
        let obj = self.params_object()?;
        let steps = obj
            .get("steps")
            .and_then(|v| v.as_array())
            .ok_or_else(|| SwitchboardError::InvalidStep("sequence step missing params.steps".to_string()))?
            .iter()
            .cloned()
            .map(DslStep::from_value)
            .collect::<SwitchboardResult<Vec<_>>>()?;
        let stop_on_failure = obj
            .get("stop_on_failure")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        Ok((steps, stop_on_failure))
    }

    /// For `parallel` steps: the `(task, params)` calls to run concurrently,
    /// and whether a failing sibling should cancel not-yet-started ones
    /// (Open Question 3; default `false`).
    pub fn parallel_calls(&self) -> SwitchboardResult<(Vec<(String, serde_json::Value)>, bool)> {
        if self.step_type != StepType::Parallel {
            return Err(SwitchboardError::InvalidStep(
                "parallel_calls called on a non-parallel step".to_string(),
            ));
        }
        let obj = self.params_object()?;
        let tasks = obj
            .get("tasks")
            .and_then(|v| v.as_array())
            .ok_or_else(|| SwitchboardError::InvalidStep("parallel step missing params.tasks".to_string()))?;
        let mut calls = Vec::with_capacity(tasks.len());
        for t in tasks {
            let obj = t
                .as_object()
                .ok_or_else(|| SwitchboardError::InvalidStep("parallel task entry must be an object".to_string()))?;
            let task = obj
                .get("task")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SwitchboardError::InvalidStep("parallel task entry missing task".to_string()))?
                .to_string();
            let params = obj.get("params").cloned().unwrap_or(serde_json::json!({}));
            calls.push((task, params));
        }
        let cancel_siblings_on_failure = obj
            .get("cancel_siblings_on_failure")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok((calls, cancel_siblings_on_failure))
    }
}
