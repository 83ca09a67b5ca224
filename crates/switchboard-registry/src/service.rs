//! The dispatch-target interface (C1/C7) and its preferred implementation.
//!
//! spec.md §9 names two strategies for "dynamic method dispatch by string
//! name": a capability interface (`handle(task_name, ...)`) or a table of
//! named handlers, with the table preferred. This collapses into one
//! `Service` trait — `supports` + `handle` — with [`HandlerTableService`]
//! implementing the preferred table strategy plus a reserved `"*"` key for
//! the `execute_task` sink fallback (C7: "prefers the named method, falls
//! back to the sink" becomes "exact key, then wildcard key").

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use switchboard_shared::context::TaskContext;
use switchboard_shared::error::ServiceError;

/// A registered service instance: discovers whether it can handle a task
/// name and, if so, runs it.
#[async_trait]
pub trait Service: Send + Sync + std::fmt::Debug {
    /// Whether this instance can handle `task_name`.
    fn supports(&self, task_name: &str) -> bool;

    /// Run `task_name` against `input_data`/`context`. Escaping panics are
    /// not caught here — the Worker (C6) is the boundary that classifies
    /// them as `ErrorCode::Internal` (Design Notes §9).
    async fn handle(
        &self,
        task_name: &str,
        input_data: serde_json::Value,
        context: &TaskContext,
    ) -> Result<serde_json::Value, ServiceError>;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A named handler: takes ownership of its inputs, returns a boxed future.
pub type Handler = Arc<
    dyn Fn(serde_json::Value, TaskContext) -> BoxFuture<'static, Result<serde_json::Value, ServiceError>>
        + Send
        + Sync,
>;

/// Reserved key for the `execute_task` sink fallback — matched only when no
/// exact `task_name` key is registered.
pub const WILDCARD_HANDLER_KEY: &str = "*";

/// Table-based `Service`: a map of `task_name -> Handler`, with an optional
/// wildcard sink.
#[derive(Debug, Clone, Default)]
pub struct HandlerTableService {
    name: String,
    handlers: Arc<DashMap<String, Handler>>,
}

impl HandlerTableService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: Arc::new(DashMap::new()),
        }
    }

    /// Register a handler for an exact task name.
    pub fn register<F, Fut>(self, task_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ServiceError>> + Send + 'static,
    {
        self.handlers
            .insert(task_name.into(), Arc::new(move |input, ctx| Box::pin(handler(input, ctx))));
        self
    }

    /// Register the `execute_task` sink fallback, matched when no exact
    /// task name is registered.
    pub fn register_fallback<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(serde_json::Value, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ServiceError>> + Send + 'static,
    {
        self.register(WILDCARD_HANDLER_KEY, handler)
    }
}

#[async_trait]
impl Service for HandlerTableService {
    fn supports(&self, task_name: &str) -> bool {
        self.handlers.contains_key(task_name) || self.handlers.contains_key(WILDCARD_HANDLER_KEY)
    }

    async fn handle(
        &self,
        task_name: &str,
        input_data: serde_json::Value,
        context: &TaskContext,
    ) -> Result<serde_json::Value, ServiceError> {
        let handler = self
            .handlers
            .get(task_name)
            .or_else(|| self.handlers.get(WILDCARD_HANDLER_KEY))
            .ok_or_else(|| {
                ServiceError::not_found(format!("{} has no handler for {task_name:?}", self.name))
            })?
            .clone();
        handler(input_data, context.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_shared::error::ErrorCode;

    fn ctx() -> TaskContext {
        TaskContext::new("u1", "t1", None, None).unwrap()
    }

    #[tokio::test]
    async fn exact_match_is_preferred_over_wildcard() {
        let service = HandlerTableService::new("text_analyzer")
            .register("analyze_text", |_input, _ctx| async move { Ok(serde_json::json!({"sentiment": "neutral"})) })
            .register_fallback(|_input, _ctx| async move { Ok(serde_json::json!({"sentiment": "fallback"})) });

        let result = service.handle("analyze_text", serde_json::json!({}), &ctx()).await.unwrap();
        assert_eq!(result, serde_json::json!({"sentiment": "neutral"}));
    }

    #[tokio::test]
    async fn falls_back_to_wildcard_when_no_exact_match() {
        let service = HandlerTableService::new("text_analyzer")
            .register_fallback(|_input, _ctx| async move { Ok(serde_json::json!({"sentiment": "fallback"})) });

        assert!(service.supports("anything"));
        let result = service.handle("anything", serde_json::json!({}), &ctx()).await.unwrap();
        assert_eq!(result, serde_json::json!({"sentiment": "fallback"}));
    }

    #[tokio::test]
    async fn unmatched_task_is_not_found() {
        let service = HandlerTableService::new("text_analyzer")
            .register("analyze_text", |_input, _ctx| async move { Ok(serde_json::json!({})) });

        assert!(!service.supports("translate_text"));
        let err = service.handle("translate_text", serde_json::json!({}), &ctx()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }
}
