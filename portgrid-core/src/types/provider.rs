//! Provider directory read model.
//!
//! Providers and instances are owned by the surrounding panel; this core
//! only reads them to resolve adapters, mapping methods, and display
//! addresses. Insert helpers exist for seeding and tests.

use serde::{Deserialize, Serialize};

/// Preferred realization mechanism for one IP stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodPreference {
    Iptables,
    DeviceProxy,
}

impl MethodPreference {
    /// Parse a stored preference. Unknown or empty values mean "unset".
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "iptables" => Some(MethodPreference::Iptables),
            "device_proxy" => Some(MethodPreference::DeviceProxy),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodPreference::Iptables => "iptables",
            MethodPreference::DeviceProxy => "device_proxy",
        }
    }
}

impl std::fmt::Display for MethodPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A virtualization backend record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// Store-assigned ID (0 before insertion).
    pub id: i64,

    /// Human-readable name.
    pub name: String,

    /// Backend-type identifier resolved through the adapter registry
    /// (e.g. "incus", "lxd").
    pub kind: String,

    /// API endpoint of the backend host.
    pub endpoint: String,

    /// Dedicated port-mapping address, when the backend exposes one.
    pub port_ip: Option<String>,

    /// IPv4 mapping-method preference.
    pub ipv4_method: Option<MethodPreference>,

    /// IPv6 mapping-method preference.
    pub ipv6_method: Option<MethodPreference>,

    /// Creation time (unix seconds).
    pub created_at: i64,
}

/// A guest instance belonging to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Opaque instance identifier.
    pub id: String,

    /// Owning provider.
    pub provider_id: i64,

    /// Human-readable name.
    pub name: String,

    /// Creation time (unix seconds).
    pub created_at: i64,
}
