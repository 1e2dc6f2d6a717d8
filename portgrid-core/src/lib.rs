//! Portgrid Core Library
//!
//! Multi-backend port-mapping allocation and bulk-operation tracking for
//! virtualized guest fleets. Adapters maintain the authoritative mapping
//! intent; an external network-configuration executor applies it.

pub mod adapters;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod state;
pub mod tasks;
pub mod types;

// Re-export commonly used items
pub use adapters::{
    AdapterRegistry, AllocatorConfig, BaseAdapter, IncusAdapter, LxdAdapter, MappingAdapter,
};
pub use config::Config;
pub use error::{PortgridError, Result};
pub use events::{Event, EventBus, EventType};
pub use state::StateManager;
pub use tasks::{BulkTask, BulkTaskEngine, BulkTaskStatus, BulkTaskType, TaskPage, TaskQuery};
pub use types::{
    CreateMappingRequest, Instance, MappingRecord, MappingStatus, MethodPreference, PortMapping,
    Protocol, Provider, UpdateMappingRequest,
};
