//! Port mapping domain types.

use serde::{Deserialize, Serialize};

/// Network protocol for a forwarded port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

/// Lifecycle status of a port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    /// Desired state, consumed by the network reconciler.
    #[default]
    Active,
    /// Kept on record but not applied to the live configuration.
    Inactive,
    /// The reconciler reported a failure applying this mapping.
    Error,
}

impl MappingStatus {
    /// Parse status from a stored row. Unknown values decode as `Error`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => MappingStatus::Active,
            "inactive" => MappingStatus::Inactive,
            "error" => MappingStatus::Error,
            _ => MappingStatus::Error,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Active => "active",
            MappingStatus::Inactive => "inactive",
            MappingStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MappingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(MappingStatus::Active),
            "inactive" => Ok(MappingStatus::Inactive),
            "error" => Ok(MappingStatus::Error),
            _ => Err(format!("Unknown mapping status: {}", s)),
        }
    }
}

/// Persisted shape of a port mapping (the store row).
///
/// Field names are the wire contract with the network-configuration
/// executor that realizes these records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRecord {
    /// Store-assigned ID (0 before insertion).
    pub id: i64,

    /// Guest instance this mapping forwards to.
    pub instance_id: String,

    /// Backend provider record the instance lives on.
    pub provider_id: i64,

    /// Protocol (tcp or udp).
    pub protocol: Protocol,

    /// Host-side port.
    pub host_port: u16,

    /// Guest-side port.
    pub guest_port: u16,

    /// Guest IPv6 address, when dual-stack forwarding is in use.
    pub ipv6_address: Option<String>,

    /// Lifecycle status.
    pub status: MappingStatus,

    /// Realization method label, resolved at creation time.
    pub mapping_method: String,

    /// Whether this mapping fronts the guest's SSH port.
    #[serde(rename = "isSSH")]
    pub is_ssh: bool,

    /// Whether the host port was auto-allocated.
    pub is_automatic: bool,

    /// Free-text description.
    pub description: String,

    /// Creation time (unix seconds).
    pub created_at: i64,

    /// Last update time (unix seconds).
    pub updated_at: i64,
}

/// A port mapping as returned to callers: the persisted record plus
/// display addresses derived from the owning provider at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub id: i64,
    pub instance_id: String,
    pub provider_id: i64,
    pub protocol: Protocol,
    pub host_port: u16,
    pub guest_port: u16,

    /// Provider host address. Display-only; empty when the provider
    /// lookup fails.
    pub host_ip: String,

    /// Public address traffic should target. Display-only.
    pub public_ip: String,

    pub ipv6_address: Option<String>,
    pub status: MappingStatus,
    pub mapping_method: String,
    #[serde(rename = "isSSH")]
    pub is_ssh: bool,
    pub is_automatic: bool,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Request to create a port mapping.
///
/// `host_port` 0 means auto-allocate. Ports are accepted as u32 so that
/// out-of-range values fail validation instead of deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateMappingRequest {
    pub instance_id: String,
    pub provider_id: i64,
    pub protocol: Option<String>,
    pub host_port: u32,
    pub guest_port: u32,
    pub description: Option<String>,
    #[serde(rename = "isSSH")]
    pub is_ssh: Option<bool>,
    pub ipv6_enabled: bool,
    pub ipv6_address: Option<String>,
    pub mapping_method: Option<String>,
}

/// Request to update an existing port mapping. All fields are applied in
/// a single atomic write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMappingRequest {
    pub id: i64,
    pub host_port: u32,
    pub guest_port: u32,
    pub protocol: String,
    pub description: String,
    pub status: String,
}
