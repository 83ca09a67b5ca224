//! DSL step executor (C8) and result persister (C9).
//!
//! [`StepExecutor`] drives a [`switchboard_shared::dsl::DslStep`] tree
//! against a [`switchboard_shared::context::TaskContext`], dispatching
//! through a [`switchboard_registry::Dispatcher`], persisting every
//! completed step via [`ResultPersister`], and (optionally) publishing
//! lifecycle events through a [`switchboard_bus::ProgressBus`].
//! Condition evaluation and variable substitution are injected seams
//! (spec §4.3/§4.8) — see [`condition`] and [`substitution`].

mod condition;
mod env;
mod executor;
mod persister;
mod substitution;

pub use condition::{ConditionEvaluator, DefaultConditionEvaluator};
pub use env::{resolve_path, ExecutionEnv};
pub use executor::{SaveCallback, StepExecutor};
pub use persister::{InMemoryKvStore, KvStore, ResultPersister, TaskIndexEntry};
pub use substitution::{DefaultVariableSubstituter, VariableSubstituter};
