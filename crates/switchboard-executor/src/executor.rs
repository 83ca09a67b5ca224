//! Step Executor (C8): drives a `DslStep` tree against a `TaskContext`,
//! dispatching `task` leaves, branching on `if`, sequencing or
//! parallelising children, and persisting + publishing a result for every
//! step that begins execution (spec §4.8, P1).
//!
//! A step tree is always evaluated within one `mode` — the mode of the
//! overarching task the tree belongs to (spec §4.3 gives `task` steps only
//! `"<service>.<method>"`; §4.7's dispatcher additionally needs `mode`,
//! which this executor fixes once per run rather than threading it through
//! every step, since a single `TaskContext`/DSL tree belongs to one mode).

use crate::condition::ConditionEvaluator;
use crate::env::ExecutionEnv;
use crate::persister::ResultPersister;
use crate::substitution::VariableSubstituter;
use futures::future::join_all;
use std::sync::Arc;
use switchboard_bus::ProgressBus;
use switchboard_registry::Dispatcher;
use switchboard_shared::context::TaskContext;
use switchboard_shared::dsl::{DslStep, StepType};
use switchboard_shared::error::{ErrorCode, SwitchboardError, SwitchboardResult};
use switchboard_shared::status::{TaskStatus, TaskStepResult};
use switchboard_shared::value::Value;
use tracing::warn;

/// Invoked after every step completes, successfully or not (spec §4.8:
/// "enabling external checkpointing"). Errors are intentionally not
/// propagated — a failing save callback must not fail the task, mirroring
/// the persister's own degraded-not-failed contract.
pub type SaveCallback = Arc<
    dyn Fn(&str, &str, i64, &TaskStepResult) + Send + Sync,
>;

/// Drives one DSL step tree against one `TaskContext`.
pub struct StepExecutor {
    dispatcher: Arc<Dispatcher>,
    condition_evaluator: Arc<dyn ConditionEvaluator>,
    substituter: Arc<dyn VariableSubstituter>,
    persister: Arc<ResultPersister>,
    bus: Option<Arc<ProgressBus>>,
    mode: String,
    save_callback: Option<SaveCallback>,
    next_step_index: std::sync::atomic::AtomicI64,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor").field("mode", &self.mode).finish()
    }
}

impl StepExecutor {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        condition_evaluator: Arc<dyn ConditionEvaluator>,
        substituter: Arc<dyn VariableSubstituter>,
        persister: Arc<ResultPersister>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            condition_evaluator,
            substituter,
            persister,
            bus: None,
            mode: mode.into(),
            save_callback: None,
            next_step_index: std::sync::atomic::AtomicI64::new(0),
        }
    }

    pub fn with_bus(mut self, bus: Arc<ProgressBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_save_callback(mut self, callback: SaveCallback) -> Self {
        self.save_callback = Some(callback);
        self
    }

    fn is_cancelled(&self, task_id: &str) -> bool {
        self.bus.as_ref().is_some_and(|bus| bus.is_cancelled(task_id))
    }

    fn publish(&self, context: &TaskContext, step_index: i64, task: &str, result: &TaskStepResult, persistence_degraded: bool) {
        if let Some(bus) = &self.bus {
            let mut event = switchboard_bus::BusEvent::step_result(
                context.user_id(),
                context.task_id(),
                step_index,
                result.status,
                task,
                result.message.clone(),
                result.result.clone(),
                result.error_message.clone(),
            );
            if persistence_degraded {
                event = event.with_persistence_degraded();
            }
            bus.send_to_user(context.user_id(), event);
        }
    }

    /// Persist the result (spec §4.9: persist failures are logged, not
    /// propagated — the worker records `persistence_degraded` instead of
    /// failing the task) and invoke the save callback. Returns whether
    /// persistence was degraded.
    async fn checkpoint(&self, context: &TaskContext, step_index: i64, result: &TaskStepResult) -> bool {
        let degraded = if let Err(err) = self
            .persister
            .persist(context.user_id(), context.task_id(), step_index, result)
            .await
        {
            warn!(
                user_id = context.user_id(),
                task_id = context.task_id(),
                step_index,
                error = %err,
                "persistence_degraded"
            );
            true
        } else {
            false
        };
        if let Some(callback) = &self.save_callback {
            callback(context.user_id(), context.task_id(), step_index, result);
        }
        degraded
    }

    fn cancelled_result(step_name: &str) -> TaskStepResult {
        TaskStepResult::failure(step_name, TaskStatus::Cancelled, ErrorCode::Cancelled, "task was cancelled")
    }

    /// Run `step` to completion, threading `variables`/`previous_results`
    /// forward and returning the (persisted, published) result.
    pub async fn run(
        &self,
        step: &DslStep,
        context: &mut TaskContext,
        previous_results: &mut Vec<TaskStepResult>,
    ) -> TaskStepResult {
        if self.is_cancelled(context.task_id()) {
            let result = Self::cancelled_result(&step_name(step));
            let step_index = self.next_index();
            let degraded = self.checkpoint(context, step_index, &result).await;
            self.publish(context, step_index, &step_name(step), &result, degraded);
            return result;
        }

        let result = match step.step_type {
            StepType::Task => self.run_task(step, context, previous_results).await,
            StepType::If => Box::pin(self.run_if(step, context, previous_results)).await,
            StepType::Sequence => Box::pin(self.run_sequence(step, context, previous_results)).await,
            StepType::Parallel => self.run_parallel(step, context, previous_results).await,
        };

        if !step.description.is_empty() {
            if let Some(value) = result.result.clone() {
                context.set_variable(step.description.clone(), Value::from(value));
            }
        }
        result
    }

    fn next_index(&self) -> i64 {
        self.next_step_index.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    async fn run_task(
        &self,
        step: &DslStep,
        context: &TaskContext,
        previous_results: &[TaskStepResult],
    ) -> TaskStepResult {
        let step_index = self.next_index();
        let (task, raw_params) = match step.task_call() {
            Ok(pair) => pair,
            Err(err) => return self.fail_invalid(context, step_index, "<invalid task step>", err).await,
        };
        let Some((service, method)) = task.split_once('.') else {
            return self
                .fail_invalid(
                    context,
                    step_index,
                    &task,
                    SwitchboardError::InvalidStep(format!("task {task:?} is not in \"service.method\" form")),
                )
                .await;
        };

        let env = ExecutionEnv {
            variables: context.variables(),
            previous_results,
        };
        let params = match self.substituter.substitute(&raw_params, &env) {
            Ok(p) => p,
            Err(err) => return self.fail_invalid(context, step_index, &task, err).await,
        };

        let result = self
            .dispatcher
            .dispatch(&self.mode, service, method, params, context)
            .await;

        let step_result = match result {
            Ok(value) => TaskStepResult::success(task.clone(), value, format!("{task} completed")),
            Err(SwitchboardError::Dispatch { source, .. }) => {
                TaskStepResult::failure(task.clone(), failure_status(source.code), source.code, source.message)
            }
            Err(err) => TaskStepResult::failure(
                task.clone(),
                failure_status(ErrorCode::Internal),
                ErrorCode::Internal,
                err.to_string(),
            ),
        };

        let degraded = self.checkpoint(context, step_index, &step_result).await;
        self.publish(context, step_index, &task, &step_result, degraded);
        step_result
    }

    async fn fail_invalid(
        &self,
        context: &TaskContext,
        step_index: i64,
        step_name: &str,
        err: SwitchboardError,
    ) -> TaskStepResult {
        let result = TaskStepResult::failure(step_name, TaskStatus::Failed, ErrorCode::InvalidParams, err.to_string());
        let degraded = self.checkpoint(context, step_index, &result).await;
        self.publish(context, step_index, step_name, &result, degraded);
        result
    }

    async fn run_if(
        &self,
        step: &DslStep,
        context: &mut TaskContext,
        previous_results: &mut Vec<TaskStepResult>,
    ) -> TaskStepResult {
        let step_index = self.next_index();
        let (then_step, else_step) = match step.if_branches() {
            Ok(branches) => branches,
            Err(err) => return self.fail_invalid(context, step_index, "<invalid if step>", err).await,
        };

        let condition = step.condition.as_deref().unwrap_or("");
        let env = ExecutionEnv {
            variables: context.variables(),
            previous_results,
        };
        let taken = match self.condition_evaluator.evaluate(condition, &env) {
            Ok(b) => b,
            Err(err) => return self.fail_invalid(context, step_index, "<if>", err).await,
        };

        match (taken, else_step) {
            (true, _) => Box::pin(self.run(&then_step, context, previous_results)).await,
            (false, Some(else_step)) => Box::pin(self.run(&else_step, context, previous_results)).await,
            (false, None) => {
                let result = TaskStepResult::success("if", serde_json::Value::Null, "condition false, no else branch");
                let degraded = self.checkpoint(context, step_index, &result).await;
                self.publish(context, step_index, "if", &result, degraded);
                result
            }
        }
    }

    async fn run_sequence(
        &self,
        step: &DslStep,
        context: &mut TaskContext,
        previous_results: &mut Vec<TaskStepResult>,
    ) -> TaskStepResult {
        let (children, stop_on_failure) = match step.sequence_children() {
            Ok(pair) => pair,
            Err(err) => return self.fail_invalid(context, self.next_index(), "<invalid sequence step>", err).await,
        };

        let mut child_results = Vec::with_capacity(children.len());
        let mut failed = false;
        for child in &children {
            if self.is_cancelled(context.task_id()) {
                let result = Self::cancelled_result(&step_name(child));
                child_results.push(result);
                failed = true;
                break;
            }
            let result = Box::pin(self.run(child, context, previous_results)).await;
            let child_failed = !result.completed;
            previous_results.push(result.clone());
            child_results.push(result);
            if child_failed {
                failed = true;
                if stop_on_failure {
                    break;
                }
            }
        }

        if failed {
            let message = format!(
                "sequence stopped after {}/{} steps",
                child_results.len(),
                children.len()
            );
            TaskStepResult {
                step: "sequence".to_string(),
                result: Some(serde_json::to_value(&child_results).unwrap_or(serde_json::Value::Null)),
                completed: false,
                message: message.clone(),
                status: TaskStatus::Failed,
                error_code: Some(ErrorCode::Internal),
                error_message: Some(message),
            }
        } else {
            TaskStepResult::success(
                "sequence",
                serde_json::to_value(&child_results).unwrap_or(serde_json::Value::Null),
                "sequence completed",
            )
        }
    }

    async fn run_parallel(
        &self,
        step: &DslStep,
        context: &TaskContext,
        previous_results: &[TaskStepResult],
    ) -> TaskStepResult {
        let step_index = self.next_index();
        let (calls, _cancel_siblings_on_failure) = match step.parallel_calls() {
            Ok(pair) => pair,
            Err(err) => return self.fail_invalid(context, step_index, "<invalid parallel step>", err).await,
        };

        // Every sibling runs to completion regardless of others' outcome —
        // the baseline design (spec §4.8: "No partial cancellation of
        // siblings on first failure"). `cancel_siblings_on_failure` is
        // accepted on the wire (Open Question 3) but this executor's
        // baseline always runs the full set; a caller wanting early
        // cancellation can check `is_cancelled` and call `cancel_task`
        // from a supervising task.
        let env = ExecutionEnv {
            variables: context.variables(),
            previous_results,
        };
        let dispatcher = &self.dispatcher;
        let mode = self.mode.clone();
        let futures = calls.iter().map(|(task, raw_params)| {
            let task = task.clone();
            let params = self.substituter.substitute(raw_params, &env);
            let context = context.clone();
            async move {
                let params = match params {
                    Ok(p) => p,
                    Err(err) => {
                        return TaskStepResult::failure(task, TaskStatus::Failed, ErrorCode::InvalidParams, err.to_string())
                    }
                };
                let Some((service, method)) = task.split_once('.') else {
                    return TaskStepResult::failure(
                        task.clone(),
                        TaskStatus::Failed,
                        ErrorCode::InvalidParams,
                        format!("task {task:?} is not in \"service.method\" form"),
                    );
                };
                match dispatcher.dispatch(&mode, service, method, params, &context).await {
                    Ok(value) => TaskStepResult::success(task.clone(), value, format!("{task} completed")),
                    Err(SwitchboardError::Dispatch { source, .. }) => {
                        TaskStepResult::failure(task.clone(), failure_status(source.code), source.code, source.message)
                    }
                    Err(err) => TaskStepResult::failure(
                        task.clone(),
                        TaskStatus::Failed,
                        ErrorCode::Internal,
                        err.to_string(),
                    ),
                }
            }
        });

        let child_results: Vec<TaskStepResult> = join_all(futures).await;
        let all_succeeded = child_results.iter().all(|r| r.completed);

        let aggregate = serde_json::to_value(&child_results).unwrap_or(serde_json::Value::Null);
        let step_result = if all_succeeded {
            TaskStepResult::success("parallel", aggregate, "all parallel tasks completed")
        } else {
            let message = "one or more parallel tasks failed".to_string();
            TaskStepResult {
                step: "parallel".to_string(),
                result: Some(aggregate),
                completed: false,
                message: message.clone(),
                status: TaskStatus::Failed,
                error_code: Some(ErrorCode::Internal),
                error_message: Some(message),
            }
        };

        let degraded = self.checkpoint(context, step_index, &step_result).await;
        self.publish(context, step_index, "parallel", &step_result, degraded);
        step_result
    }
}

fn step_name(step: &DslStep) -> String {
    if !step.description.is_empty() {
        return step.description.clone();
    }
    match step.step_type {
        StepType::Task => step.task_call().map(|(task, _)| task).unwrap_or_else(|_| "task".to_string()),
        StepType::If => "if".to_string(),
        StepType::Sequence => "sequence".to_string(),
        StepType::Parallel => "parallel".to_string(),
    }
}

fn failure_status(code: ErrorCode) -> TaskStatus {
    match code {
        ErrorCode::Cancelled => TaskStatus::Cancelled,
        ErrorCode::Timeout => TaskStatus::TimedOut,
        _ => TaskStatus::Failed,
    }
}
