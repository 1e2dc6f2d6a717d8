//! LXD backend adapter.
//!
//! Behaviorally identical to the Incus adapter; diverges only in the
//! backend label embedded in mapping-method strings.

use crate::adapters::{AllocatorConfig, BaseAdapter, MappingAdapter};
use crate::error::Result;
use crate::events::EventBus;
use crate::state::StateManager;
use crate::types::{CreateMappingRequest, PortMapping, UpdateMappingRequest};
use async_trait::async_trait;
use std::sync::Arc;

/// Backend label for LXD providers.
pub const BACKEND: &str = "lxd";

/// Mapping adapter for LXD-backed providers.
pub struct LxdAdapter {
    base: BaseAdapter,
}

impl LxdAdapter {
    /// Create a new LXD adapter.
    pub fn new(state: Arc<StateManager>, allocator: AllocatorConfig, events: EventBus) -> Self {
        Self { base: BaseAdapter::new(BACKEND, state, allocator, events) }
    }
}

#[async_trait]
impl MappingAdapter for LxdAdapter {
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
