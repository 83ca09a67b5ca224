//! Service registry (C1) and dispatcher (C7).
//!
//! A `Service` is anything that can answer `supports(task_name)` /
//! `handle(task_name, ...)`; [`HandlerTableService`] is the preferred
//! table-based implementation (spec §9). The [`ServiceRegistry`] maps
//! `(mode, service)` pairs to factories producing `Service` instances, with
//! atomic duplicate rejection (P5). The [`Dispatcher`] ties the two
//! together for the Worker (C6).

mod dispatcher;
mod registry;
mod service;

pub use dispatcher::Dispatcher;
pub use registry::{ServiceFactory, ServiceRegistry};
pub use service::{Handler, HandlerTableService, Service, WILDCARD_HANDLER_KEY};
