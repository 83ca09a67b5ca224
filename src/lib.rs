//! Switchboard — task execution core for AI-service middleware.
//!
//! This crate has no code of its own; it re-exports the workspace members so
//! downstream consumers can depend on a single crate. See `SPEC_FULL.md` and
//! `DESIGN.md` at the workspace root for the design rationale.

pub use switchboard_bus as bus;
pub use switchboard_executor as executor;
pub use switchboard_registry as registry;
pub use switchboard_shared as shared;
pub use switchboard_worker as worker;
