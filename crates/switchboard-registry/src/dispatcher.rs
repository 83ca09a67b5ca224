//! Dispatcher (C7): resolves `(mode, service)` via the [`ServiceRegistry`]
//! and invokes the step's task name against the resolved instance.
//!
//! Errors raised by the service are wrapped in `SwitchboardError::Dispatch`
//! so callers (the Worker, C6) can tell a service failure apart from a
//! registry-resolution failure without inspecting strings.

use crate::registry::ServiceRegistry;
use std::sync::Arc;
use switchboard_shared::context::TaskContext;
use switchboard_shared::error::{SwitchboardError, SwitchboardResult};

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Resolve `(mode, service)` and invoke `task_name`.
    ///
    /// Resolution failures (`ServiceNotFound`) propagate as-is — there is
    /// no service to tag the error with. A failure from the service itself
    /// is wrapped as `Dispatch { service, method: task_name, source }` so
    /// the origin survives past this call.
    pub async fn dispatch(
        &self,
        mode: &str,
        service: &str,
        task_name: &str,
        input_data: serde_json::Value,
        context: &TaskContext,
    ) -> SwitchboardResult<serde_json::Value> {
        let instance = self.registry.lookup(mode, service)?;
        instance
            .handle(task_name, input_data, context)
            .await
            .map_err(|source| SwitchboardError::Dispatch {
                service: service.to_string(),
                method: task_name.to_string(),
                source,
            })
    }
}
