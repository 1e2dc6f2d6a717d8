//! Backend mapping adapters.
//!
//! Each virtualization backend implements the `MappingAdapter` trait.
//! The shipped backends (Incus, LXD) share one underlying mapping
//! mechanism and delegate everything to the common `BaseAdapter`; the
//! only divergence is the backend label embedded in mapping-method
//! strings. New backends register a constructor in `AdapterRegistry`.

use crate::error::Result;
use crate::types::{CreateMappingRequest, PortMapping, UpdateMappingRequest};
use async_trait::async_trait;

/// Backend adapter contract.
///
/// All operations persist desired state only; the network-configuration
/// executor applies it to the live configuration separately.
#[async_trait]
pub trait MappingAdapter: Send + Sync {
    /// Backend label used in mapping-method strings (for logging too).
    fn backend(&self) -> &'static str;

    /// Validate, allocate, and persist a new port mapping.
    async fn create(&self, request: CreateMappingRequest) -> Result<PortMapping>;

    /// Apply field-level updates to an existing mapping in one atomic
    /// write and return the refreshed mapping.
    async fn update(&self, request: UpdateMappingRequest) -> Result<PortMapping>;

    /// Remove a mapping record (hard removal).
    async fn delete(&self, id: i64) -> Result<()>;

    /// Every mapping for an instance, enriched with the owning
    /// provider's display address where resolvable.
    async fn list(&self, instance_id: &str) -> Result<Vec<PortMapping>>;

    /// Re-activate the instance's inactive mappings. Returns a summary
    /// line for the bulk task log.
    async fn enable_instance(&self, instance_id: &str) -> Result<String>;

    /// Deactivate the instance's active mappings. Returns a summary line
    /// for the bulk task log.
    async fn disable_instance(&self, instance_id: &str) -> Result<String>;

    /// Ensure the instance has an active SSH mapping, auto-allocating
    /// one when missing. Returns a summary line for the bulk task log.
    async fn detect_instance(&self, instance_id: &str) -> Result<String>;
}

pub mod base;
pub mod incus;
pub mod lxd;

mod registry;

pub use base::{AllocatorConfig, BaseAdapter};
pub use incus::IncusAdapter;
pub use lxd::LxdAdapter;
pub use registry::AdapterRegistry;
