//! Error types for portgrid.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use thiserror::Error;

/// Result type alias for portgrid operations.
pub type Result<T> = std::result::Result<T, PortgridError>;

/// Main error type for portgrid.
#[derive(Error, Debug)]
pub enum PortgridError {
    // Request validation errors
    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    // Lookup errors
    #[error("Provider not found: {provider_id}")]
    ProviderNotFound { provider_id: i64 },

    #[error("Instance not found: {instance_id}")]
    InstanceNotFound { instance_id: String },

    #[error("Port mapping not found: {id}")]
    MappingNotFound { id: i64 },

    #[error("Bulk task not found: {id}")]
    TaskNotFound { id: i64 },

    #[error("Unknown provider type: {kind}")]
    UnknownProviderType { kind: String },

    // Port allocation errors
    #[error("Port {port} already in use")]
    PortConflict { port: u16 },

    #[error("No free host port found within {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    // Bulk task state errors
    #[error("Illegal task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database migration failed: {reason}")]
    MigrationFailed { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PortgridError {
    /// Create a Validation error from any displayable reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }
}
