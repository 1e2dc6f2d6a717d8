//! Shared domain types.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod mapping;
pub mod provider;

pub use mapping::{
    CreateMappingRequest, MappingRecord, MappingStatus, PortMapping, Protocol,
    UpdateMappingRequest,
};
pub use provider::{Instance, MethodPreference, Provider};

/// Current time as unix seconds.
pub(crate) fn now_ts() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
