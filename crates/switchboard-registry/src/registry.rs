//! Service registry (C1): maps `(mode, service)` to a factory that
//! produces a [`Service`] instance.
//!
//! Registration is atomic and rejects duplicates (P5: "no two registrations
//! may claim the same (mode, service) key"), using `DashMap::entry` rather
//! than a check-then-insert so two concurrent registrations for the same
//! key cannot both succeed.

use crate::service::Service;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use switchboard_shared::error::{SwitchboardError, SwitchboardResult};

/// Produces a fresh `Service` instance on each lookup. Factories, not bare
/// instances, are registered so a service may be stateless-per-invocation
/// (spec §9, Design Notes on Global mutable registries: "the registry
/// itself is the one piece of global state; what it hands back need not
/// be").
pub type ServiceFactory = Arc<dyn Fn() -> Arc<dyn Service> + Send + Sync>;

fn registry_key(mode: &str, service: &str) -> (String, String) {
    (mode.to_string(), service.to_string())
}

/// Process-wide table of `(mode, service) -> ServiceFactory`.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    factories: DashMap<(String, String), ServiceFactory>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Register a factory for `(mode, service)`. Fails with
    /// `DuplicateRegistration` if the key is already taken — checked and
    /// inserted atomically via the entry API.
    pub fn register(
        &self,
        mode: impl Into<String>,
        service: impl Into<String>,
        factory: ServiceFactory,
    ) -> SwitchboardResult<()> {
        let mode = mode.into();
        let service = service.into();
        match self.factories.entry(registry_key(&mode, &service)) {
            Entry::Occupied(_) => Err(SwitchboardError::DuplicateRegistration { mode, service }),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                Ok(())
            }
        }
    }

    /// Convenience wrapper for factories that construct a fresh
    /// `T: Service + Default` on every lookup.
    pub fn register_default<T>(&self, mode: impl Into<String>, service: impl Into<String>) -> SwitchboardResult<()>
    where
        T: Service + Default + 'static,
    {
        self.register(mode, service, Arc::new(|| Arc::new(T::default()) as Arc<dyn Service>))
    }

    /// Register a single shared instance, cloned out of an `Arc` on every
    /// lookup rather than reconstructed.
    pub fn register_instance(
        &self,
        mode: impl Into<String>,
        service: impl Into<String>,
        instance: Arc<dyn Service>,
    ) -> SwitchboardResult<()> {
        self.register(mode, service, Arc::new(move || instance.clone()))
    }

    /// Resolve `(mode, service)` to a fresh `Service` instance.
    pub fn lookup(&self, mode: &str, service: &str) -> SwitchboardResult<Arc<dyn Service>> {
        self.factories
            .get(&registry_key(mode, service))
            .map(|factory| factory())
            .ok_or_else(|| SwitchboardError::ServiceNotFound {
                mode: mode.to_string(),
                service: service.to_string(),
            })
    }

    pub fn is_registered(&self, mode: &str, service: &str) -> bool {
        self.factories.contains_key(&registry_key(mode, service))
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::HandlerTableService;
    use switchboard_shared::context::TaskContext;

    fn sample_service() -> Arc<dyn Service> {
        Arc::new(
            HandlerTableService::new("text_analyzer")
                .register("analyze_text", |_input, _ctx| async move { Ok(serde_json::json!({})) }),
        )
    }

    #[test]
    fn register_and_lookup_round_trip() {
        let registry = ServiceRegistry::new();
        registry
            .register("chat", "text_analyzer", Arc::new(sample_service))
            .unwrap();

        assert!(registry.is_registered("chat", "text_analyzer"));
        let service = registry.lookup("chat", "text_analyzer").unwrap();
        assert!(service.supports("analyze_text"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = ServiceRegistry::new();
        registry
            .register("chat", "text_analyzer", Arc::new(sample_service))
            .unwrap();

        let err = registry
            .register("chat", "text_analyzer", Arc::new(sample_service))
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::DuplicateRegistration { .. }));
    }

    #[test]
    fn unregistered_key_is_not_found() {
        let registry = ServiceRegistry::new();
        let err = registry.lookup("chat", "missing").unwrap_err();
        assert!(matches!(err, SwitchboardError::ServiceNotFound { .. }));
    }

    #[test]
    fn same_service_name_different_mode_is_distinct() {
        let registry = ServiceRegistry::new();
        registry
            .register("chat", "text_analyzer", Arc::new(sample_service))
            .unwrap();
        registry
            .register("batch", "text_analyzer", Arc::new(sample_service))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn register_instance_shares_state() {
        let registry = ServiceRegistry::new();
        let instance = sample_service();
        registry
            .register_instance("chat", "text_analyzer", instance)
            .unwrap();

        let looked_up = registry.lookup("chat", "text_analyzer").unwrap();
        let ctx = TaskContext::new("u1", "t1", None, None).unwrap();
        let result = looked_up.handle("analyze_text", serde_json::json!({}), &ctx).await;
        assert!(result.is_ok());
    }
}
