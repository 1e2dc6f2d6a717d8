//! Incus backend adapter.
//!
//! Shares the common mapping mechanism with the LXD adapter; only the
//! backend label in mapping-method strings differs.

use crate::adapters::{AllocatorConfig, BaseAdapter, MappingAdapter};
use crate::error::Result;
use crate::events::EventBus;
use crate::state::StateManager;
use crate::types::{CreateMappingRequest, PortMapping, UpdateMappingRequest};
use async_trait::async_trait;
use std::sync::Arc;

/// Backend label for Incus providers.
pub const BACKEND: &str = "incus";

/// Mapping adapter for Incus-backed providers.
pub struct IncusAdapter {
    base: BaseAdapter,
}

impl IncusAdapter {
    /// Create a new Incus adapter.
    pub fn new(state: Arc<StateManager>, allocator: AllocatorConfig, events: EventBus) -> Self {
        Self { base: BaseAdapter::new(BACKEND, state, allocator, events) }
    }
}

#[async_trait]
impl MappingAdapter for IncusAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn create(&self, request: CreateMappingRequest) -> Result<PortMapping> {
        self.base.create(request).await
    }

    async fn update(&self, request: UpdateMappingRequest) -> Result<PortMapping> {
        self.base.update(request).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.base.delete(id).await
    }

    async fn list(&self, instance_id: &str) -> Result<Vec<PortMapping>> {
        self.base.list(instance_id).await
    }

    async fn enable_instance(&self, instance_id: &str) -> Result<String> {
        self.base.enable_instance(instance_id).await
    }

    async fn disable_instance(&self, instance_id: &str) -> Result<String> {
        self.base.disable_instance(instance_id).await
    }

    async fn detect_instance(&self, instance_id: &str) -> Result<String> {
        self.base.detect_instance(instance_id).await
    }
}
