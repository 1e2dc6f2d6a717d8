//! Adapter registry: backend-type identifier to adapter constructor.
//!
//! Registration is explicit and happens at process start; lookup is a
//! plain key lookup. No dynamic discovery.

use crate::adapters::{AllocatorConfig, IncusAdapter, LxdAdapter, MappingAdapter};
use crate::error::{PortgridError, Result};
use crate::events::EventBus;
use crate::state::StateManager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

type AdapterCtor =
    Box<dyn Fn(Arc<StateManager>, AllocatorConfig, EventBus) -> Arc<dyn MappingAdapter> + Send + Sync>;

/// Process-wide map from backend-type identifier to adapter constructor.
#[derive(Default)]
pub struct AdapterRegistry {
    ctors: HashMap<String, AdapterCtor>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { ctors: HashMap::new() }
    }

    /// Create a registry with the shipped backends registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("incus", |state, allocator, events| {
            Arc::new(IncusAdapter::new(state, allocator, events))
        });
        registry.register("lxd", |state, allocator, events| {
            Arc::new(LxdAdapter::new(state, allocator, events))
        });
        registry
    }

    /// Register a constructor for a backend-type identifier. A repeated
    /// identifier replaces the previous constructor.
    pub fn register<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(Arc<StateManager>, AllocatorConfig, EventBus) -> Arc<dyn MappingAdapter>
            + Send
            + Sync
            + 'static,
    {
        info!(kind, "Registering mapping adapter");
        self.ctors.insert(kind.to_string(), Box::new(ctor));
    }

    /// Construct the adapter for a backend-type identifier.
    pub fn resolve(
        &self,
        kind: &str,
        state: Arc<StateManager>,
        allocator: AllocatorConfig,
        events: EventBus,
    ) -> Result<Arc<dyn MappingAdapter>> {
        let ctor = self
            .ctors
            .get(kind)
            .ok_or_else(|| PortgridError::UnknownProviderType { kind: kind.to_string() })?;

        debug!(kind, "Resolved mapping adapter");
        Ok(ctor(state, allocator, events))
    }

    /// Registered backend-type identifiers.
    pub fn kinds(&self) -> Vec<&str> {
        self.ctors.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_backends() {
        let registry = AdapterRegistry::builtin();
        let state = Arc::new(StateManager::new_in_memory().await.unwrap());

        for kind in ["incus", "lxd"] {
            let adapter = registry
                .resolve(kind, state.clone(), AllocatorConfig::default(), EventBus::new())
                .unwrap();
            assert_eq!(adapter.backend(), kind);
        }
    }

    #[tokio::test]
    async fn test_unknown_provider_type() {
        let registry = AdapterRegistry::builtin();
        let state = Arc::new(StateManager::new_in_memory().await.unwrap());

        let result =
            registry.resolve("proxmox", state, AllocatorConfig::default(), EventBus::new());
        match result {
            Err(PortgridError::UnknownProviderType { kind }) => assert_eq!(kind, "proxmox"),
            _ => panic!("Expected UnknownProviderType error"),
        }
    }

    #[tokio::test]
    async fn test_custom_registration() {
        let mut registry = AdapterRegistry::new();
        assert!(registry.kinds().is_empty());

        registry.register("incus", |state, allocator, events| {
            Arc::new(IncusAdapter::new(state, allocator, events))
        });

        let state = Arc::new(StateManager::new_in_memory().await.unwrap());
        assert!(registry
            .resolve("incus", state.clone(), AllocatorConfig::default(), EventBus::new())
            .is_ok());
        assert!(registry
            .resolve("lxd", state, AllocatorConfig::default(), EventBus::new())
            .is_err());
    }
}
