//! Shared types for the switchboard task execution core.
//!
//! Cross-cutting concerns used by every other crate in the workspace:
//! the error taxonomy (C10), layered configuration, the resilience
//! (circuit breaker + backoff) layer, the task context and DSL step model
//! (C2/C3), the tagged `Value` type, and the broker message envelope with
//! its provider abstraction (C5).

pub mod config;
pub mod context;
pub mod dsl;
pub mod error;
pub mod messaging;
pub mod resilience;
pub mod status;
pub mod value;

pub use config::SwitchboardConfig;
pub use context::TaskContext;
pub use dsl::{DslStep, StepType};
pub use error::{ErrorCode, ServiceError, SwitchboardError, SwitchboardResult};
pub use status::{TaskStatus, TaskStepResult, UserConfirmation};
pub use value::{Value, ValueMap};
