//! Shared adapter behavior: validation, host-port allocation, method
//! resolution, and record conversion.
//!
//! Every backend adapter holds a `BaseAdapter` and delegates to it; the
//! backend label is the only per-backend input. Allocation is a
//! scan-then-insert over the configured ephemeral range. The scan is
//! advisory: the store's unique index on active (provider, protocol,
//! host_port) rows decides races, and a conflict is retried with a fresh
//! scan up to the configured attempt limit.

use crate::error::{PortgridError, Result};
use crate::events::{Event, EventBus, EventType};
use crate::state::StateManager;
use crate::types::{
    now_ts, CreateMappingRequest, MappingRecord, MappingStatus, MethodPreference, PortMapping,
    Protocol, Provider, UpdateMappingRequest,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Host-port allocation parameters.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// First port of the ephemeral range (inclusive).
    pub range_start: u16,

    /// Last port of the ephemeral range (inclusive).
    pub range_end: u16,

    /// Insert attempts before giving up with `AllocationExhausted`.
    pub max_attempts: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self { range_start: 20000, range_end: 32767, max_attempts: 10 }
    }
}

/// Shared component behind every backend adapter.
pub struct BaseAdapter {
    backend: &'static str,
    state: Arc<StateManager>,
    allocator: AllocatorConfig,
    events: EventBus,
}

impl BaseAdapter {
    /// Create a base adapter for the given backend label.
    pub fn new(
        backend: &'static str,
        state: Arc<StateManager>,
        allocator: AllocatorConfig,
        events: EventBus,
    ) -> Self {
        Self { backend, state, allocator, events }
    }

    // ========================
    // Pure helpers
    // ========================

    /// Resolve the mapping-method label for a request.
    ///
    /// An explicitly requested method is used verbatim. Otherwise the
    /// provider's per-stack preference selects between the iptables and
    /// device-proxy variants, with device-proxy as the default branch.
    pub fn resolve_mapping_method(
        backend: &str,
        explicit: Option<&str>,
        ipv6: bool,
        provider: &Provider,
    ) -> String {
        if let Some(method) = explicit {
            if !method.is_empty() {
                return method.to_string();
            }
        }

        let preference = if ipv6 { provider.ipv6_method } else { provider.ipv4_method };
        let suffix = if ipv6 { "-ipv6" } else { "" };

        match preference {
            Some(MethodPreference::Iptables) => format!("{}-iptables{}", backend, suffix),
            Some(MethodPreference::DeviceProxy) | None => {
                format!("{}-device-proxy{}", backend, suffix)
            }
        }
    }

    /// Address traffic should target: the dedicated port-mapping IP when
    /// the provider has one, else its endpoint.
    pub fn resolve_public_address(provider: &Provider) -> String {
        match provider.port_ip {
            Some(ref ip) if !ip.is_empty() => ip.clone(),
            _ => provider.endpoint.clone(),
        }
    }

    /// Convert a result mapping back to its persisted shape, dropping
    /// the derived display fields.
    pub fn to_record(mapping: &PortMapping) -> MappingRecord {
        MappingRecord {
            id: mapping.id,
            instance_id: mapping.instance_id.clone(),
            provider_id: mapping.provider_id,
            protocol: mapping.protocol,
            host_port: mapping.host_port,
            guest_port: mapping.guest_port,
            ipv6_address: mapping.ipv6_address.clone(),
            status: mapping.status,
            mapping_method: mapping.mapping_method.clone(),
            is_ssh: mapping.is_ssh,
            is_automatic: mapping.is_automatic,
            description: mapping.description.clone(),
            created_at: mapping.created_at,
            updated_at: mapping.updated_at,
        }
    }

    /// Enrich a persisted record into the result shape. Address fields
    /// stay empty when the provider is unavailable.
    pub fn from_record(record: MappingRecord, provider: Option<&Provider>) -> PortMapping {
        let (host_ip, public_ip) = match provider {
            Some(p) => (p.endpoint.clone(), Self::resolve_public_address(p)),
            None => (String::new(), String::new()),
        };

        PortMapping {
            id: record.id,
            instance_id: record.instance_id,
            provider_id: record.provider_id,
            protocol: record.protocol,
            host_port: record.host_port,
            guest_port: record.guest_port,
            host_ip,
            public_ip,
            ipv6_address: record.ipv6_address,
            status: record.status,
            mapping_method: record.mapping_method,
            is_ssh: record.is_ssh,
            is_automatic: record.is_automatic,
            description: record.description,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }

    fn validate_port(value: u32, field: &str) -> Result<u16> {
        match value {
            1..=65535 => Ok(value as u16),
            _ => Err(PortgridError::Validation {
                reason: format!("{} must be in [1,65535], got {}", field, value),
            }),
        }
    }

    fn validate_protocol(value: Option<&str>) -> Result<Protocol> {
        match value {
            None | Some("") => Ok(Protocol::default()),
            Some(s) => {
                s.parse().map_err(|reason: String| PortgridError::Validation { reason })
            }
        }
    }

    // ========================
    // Allocation
    // ========================

    /// Insert a mapping record, auto-allocating the host port when it is
    /// zero. A requested port gets exactly one attempt; an allocated one
    /// retries on conflict with a fresh scan.
    async fn insert_with_allocation(&self, mut record: MappingRecord) -> Result<MappingRecord> {
        if record.host_port != 0 {
            return self.state.insert_mapping(&record).await;
        }

        for attempt in 0..self.allocator.max_attempts {
            let used: HashSet<u16> = self
                .state
                .list_active_host_ports(record.provider_id, record.protocol)
                .await?
                .into_iter()
                .collect();

            let candidate = (self.allocator.range_start..=self.allocator.range_end)
                .find(|port| !used.contains(port));

            let Some(candidate) = candidate else {
                warn!(
                    provider_id = record.provider_id,
                    "Ephemeral port range exhausted for provider"
                );
                break;
            };

            record.host_port = candidate;
            match self.state.insert_mapping(&record).await {
                Ok(inserted) => {
                    metrics::counter!("portgrid_ports_allocated_total", "status" => "success")
                        .increment(1);
                    return Ok(inserted);
                }
                Err(PortgridError::PortConflict { port }) => {
                    debug!(port, attempt, "Allocation raced with a concurrent claim, retrying");
                    metrics::counter!("portgrid_ports_allocated_total", "status" => "conflict")
                        .increment(1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(PortgridError::AllocationExhausted { attempts: self.allocator.max_attempts })
    }

    // ========================
    // Mapping operations
    // ========================

    /// Validate, allocate, and persist a new port mapping.
    #[instrument(skip(self, request), fields(backend = self.backend, instance_id = %request.instance_id))]
    pub async fn create(&self, request: CreateMappingRequest) -> Result<PortMapping> {
        if request.instance_id.is_empty() {
            return Err(PortgridError::validation("instanceId must not be empty"));
        }

        let protocol = Self::validate_protocol(request.protocol.as_deref())?;
        let guest_port = Self::validate_port(request.guest_port, "guestPort")?;
        let host_port = match request.host_port {
            0 => 0,
            requested => Self::validate_port(requested, "hostPort")?,
        };

        let provider = self.state.get_provider(request.provider_id).await?;

        // Explicit override wins over the SSH-port heuristic
        let is_ssh = request.is_ssh.unwrap_or(guest_port == 22);
        let mapping_method = Self::resolve_mapping_method(
            self.backend,
            request.mapping_method.as_deref(),
            request.ipv6_enabled,
            &provider,
        );

        let now = now_ts();
        let record = MappingRecord {
            id: 0,
            instance_id: request.instance_id,
            provider_id: request.provider_id,
            protocol,
            host_port,
            guest_port,
            ipv6_address: if request.ipv6_enabled { request.ipv6_address } else { None },
            status: MappingStatus::Active,
            mapping_method,
            is_ssh,
            is_automatic: request.host_port == 0,
            description: request.description.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        let record = self.insert_with_allocation(record).await?;

        info!(
            mapping_id = record.id,
            host_port = record.host_port,
            guest_port = record.guest_port,
            "Created port mapping"
        );
        metrics::counter!("portgrid_mappings_created_total", "backend" => self.backend)
            .increment(1);
        self.events.publish(Event::new(
            EventType::MappingCreated,
            &record.id.to_string(),
            &format!("{}:{} -> {}", record.host_port, record.protocol, record.guest_port),
        ));

        Ok(Self::from_record(record, Some(&provider)))
    }

    /// Apply field-level updates in a single atomic write and return the
    /// refreshed mapping.
    #[instrument(skip(self, request), fields(backend = self.backend, mapping_id = request.id))]
    pub async fn update(&self, request: UpdateMappingRequest) -> Result<PortMapping> {
        let existing = self.state.get_mapping(request.id).await?;
        let provider = self.state.get_provider(existing.provider_id).await?;

        let protocol = Self::validate_protocol(match request.protocol.as_str() {
            "" => None,
            s => Some(s),
        })?;
        let host_port = Self::validate_port(request.host_port, "hostPort")?;
        let guest_port = Self::validate_port(request.guest_port, "guestPort")?;
        let status: MappingStatus = request
            .status
            .parse()
            .map_err(|reason: String| PortgridError::Validation { reason })?;

        // Refresh the method from current provider configuration; an
        // update is the point where a changed provider preference lands.
        let mapping_method = Self::resolve_mapping_method(
            self.backend,
            None,
            existing.ipv6_address.is_some(),
            &provider,
        );

        self.state
            .update_mapping_fields(
                request.id,
                host_port,
                guest_port,
                protocol,
                &request.description,
                status,
                &mapping_method,
                now_ts(),
            )
            .await?;

        let record = self.state.get_mapping(request.id).await?;

        info!(mapping_id = record.id, "Updated port mapping");
        self.events.publish(Event::new(
            EventType::MappingUpdated,
            &record.id.to_string(),
            &format!("{}:{} -> {}", record.host_port, record.protocol, record.guest_port),
        ));

        Ok(Self::from_record(record, Some(&provider)))
    }

    /// Remove a mapping record.
    #[instrument(skip(self), fields(backend = self.backend, mapping_id = id))]
    pub async fn delete(&self, id: i64) -> Result<()> {
        let record = self.state.get_mapping(id).await?;
        self.state.delete_mapping(id).await?;

        info!(mapping_id = id, host_port = record.host_port, "Deleted port mapping");
        metrics::counter!("portgrid_mappings_deleted_total", "backend" => self.backend)
            .increment(1);
        self.events.publish(Event::new(
            EventType::MappingDeleted,
            &id.to_string(),
            &format!("{}:{}", record.host_port, record.protocol),
        ));

        Ok(())
    }

    /// Every mapping for an instance, enriched with provider display
    /// addresses. A failed provider lookup leaves that mapping's address
    /// fields empty without failing the listing.
    #[instrument(skip(self), fields(backend = self.backend, instance_id = %instance_id))]
    pub async fn list(&self, instance_id: &str) -> Result<Vec<PortMapping>> {
        let records = self.state.list_instance_mappings(instance_id).await?;

        let mut providers: HashMap<i64, Option<Provider>> = HashMap::new();
        let mut mappings = Vec::with_capacity(records.len());

        for record in records {
            if !providers.contains_key(&record.provider_id) {
                let provider = match self.state.get_provider(record.provider_id).await {
                    Ok(p) => Some(p),
                    Err(PortgridError::ProviderNotFound { provider_id }) => {
                        warn!(provider_id, "Provider missing while listing mappings");
                        None
                    }
                    Err(e) => return Err(e),
                };
                providers.insert(record.provider_id, provider);
            }

            let provider = providers.get(&record.provider_id).and_then(|p| p.as_ref());
            mappings.push(Self::from_record(record, provider));
        }

        Ok(mappings)
    }

    // ========================
    // Per-instance bulk actions
    // ========================

    /// Re-activate the instance's inactive mappings.
    #[instrument(skip(self), fields(backend = self.backend, instance_id = %instance_id))]
    pub async fn enable_instance(&self, instance_id: &str) -> Result<String> {
        let records = self.state.list_instance_mappings(instance_id).await?;
        let mut enabled = 0usize;

        for record in records.iter().filter(|r| r.status == MappingStatus::Inactive) {
            self.state.set_mapping_status(record, MappingStatus::Active, now_ts()).await?;
            enabled += 1;
        }

        Ok(format!("enabled {} of {} mappings", enabled, records.len()))
    }

    /// Deactivate the instance's active mappings.
    #[instrument(skip(self), fields(backend = self.backend, instance_id = %instance_id))]
    pub async fn disable_instance(&self, instance_id: &str) -> Result<String> {
        let records = self.state.list_instance_mappings(instance_id).await?;
        let mut disabled = 0usize;

        for record in records.iter().filter(|r| r.status == MappingStatus::Active) {
            self.state.set_mapping_status(record, MappingStatus::Inactive, now_ts()).await?;
            disabled += 1;
        }

        Ok(format!("disabled {} of {} mappings", disabled, records.len()))
    }

    /// Ensure the instance has an SSH mapping, auto-allocating one when
    /// missing.
    #[instrument(skip(self), fields(backend = self.backend, instance_id = %instance_id))]
    pub async fn detect_instance(&self, instance_id: &str) -> Result<String> {
        let instance = self.state.get_instance(instance_id).await?;
        let records = self.state.list_instance_mappings(instance_id).await?;

        if let Some(ssh) = records.iter().find(|r| r.is_ssh) {
            return Ok(format!("ssh mapping present on host port {}", ssh.host_port));
        }

        let provider = self.state.get_provider(instance.provider_id).await?;
        let now = now_ts();
        let record = MappingRecord {
            id: 0,
            instance_id: instance.id.clone(),
            provider_id: instance.provider_id,
            protocol: Protocol::Tcp,
            host_port: 0,
            guest_port: 22,
            ipv6_address: None,
            status: MappingStatus::Active,
            mapping_method: Self::resolve_mapping_method(self.backend, None, false, &provider),
            is_ssh: true,
            is_automatic: true,
            description: "ssh (detected)".to_string(),
            created_at: now,
            updated_at: now,
        };

        let record = self.insert_with_allocation(record).await?;

        info!(instance_id = %instance.id, host_port = record.host_port, "Detected missing ssh mapping");
        Ok(format!("ssh mapping created on host port {}", record.host_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider(
        ipv4: Option<MethodPreference>,
        ipv6: Option<MethodPreference>,
    ) -> Provider {
        Provider {
            id: 1,
            name: "node-1".to_string(),
            kind: "incus".to_string(),
            endpoint: "203.0.113.10".to_string(),
            port_ip: None,
            ipv4_method: ipv4,
            ipv6_method: ipv6,
            created_at: 0,
        }
    }

    #[test]
    fn test_resolve_method_explicit_wins() {
        let provider = test_provider(Some(MethodPreference::Iptables), None);
        let method =
            BaseAdapter::resolve_mapping_method("incus", Some("custom-method"), false, &provider);
        assert_eq!(method, "custom-method");

        // Empty explicit value falls through to the decision table
        let method = BaseAdapter::resolve_mapping_method("incus", Some(""), false, &provider);
        assert_eq!(method, "incus-iptables");
    }

    #[test]
    fn test_resolve_method_decision_table() {
        use MethodPreference::{DeviceProxy, Iptables};

        // (ipv4 pref, ipv6 pref, ipv6 requested, expected)
        let cases = [
            (Some(Iptables), None, false, "lxd-iptables"),
            (Some(DeviceProxy), None, false, "lxd-device-proxy"),
            (None, None, false, "lxd-device-proxy"),
            (None, Some(Iptables), true, "lxd-iptables-ipv6"),
            (None, Some(DeviceProxy), true, "lxd-device-proxy-ipv6"),
            (None, None, true, "lxd-device-proxy-ipv6"),
            // The other stack's preference must not leak over
            (Some(Iptables), Some(DeviceProxy), true, "lxd-device-proxy-ipv6"),
            (Some(DeviceProxy), Some(Iptables), false, "lxd-device-proxy"),
        ];

        for (ipv4, ipv6, stack_v6, expected) in cases {
            let provider = test_provider(ipv4, ipv6);
            let method = BaseAdapter::resolve_mapping_method("lxd", None, stack_v6, &provider);
            assert_eq!(method, expected, "ipv4={:?} ipv6={:?} v6={}", ipv4, ipv6, stack_v6);
        }
    }

    #[test]
    fn test_resolve_public_address() {
        let mut provider = test_provider(None, None);
        assert_eq!(BaseAdapter::resolve_public_address(&provider), "203.0.113.10");

        provider.port_ip = Some(String::new());
        assert_eq!(BaseAdapter::resolve_public_address(&provider), "203.0.113.10");

        provider.port_ip = Some("198.51.100.7".to_string());
        assert_eq!(BaseAdapter::resolve_public_address(&provider), "198.51.100.7");
    }

    #[test]
    fn test_record_conversion_roundtrip() {
        let provider = test_provider(None, None);
        let record = MappingRecord {
            id: 42,
            instance_id: "inst-7".to_string(),
            provider_id: 1,
            protocol: Protocol::Udp,
            host_port: 24001,
            guest_port: 53,
            ipv6_address: Some("2001:db8::7".to_string()),
            status: MappingStatus::Inactive,
            mapping_method: "incus-device-proxy".to_string(),
            is_ssh: false,
            is_automatic: true,
            description: "dns".to_string(),
            created_at: 1700000000,
            updated_at: 1700000100,
        };

        let mapping = BaseAdapter::from_record(record.clone(), Some(&provider));
        assert_eq!(mapping.host_ip, "203.0.113.10");
        assert_eq!(mapping.public_ip, "203.0.113.10");
        assert_eq!(BaseAdapter::to_record(&mapping), record);

        // Missing provider leaves addresses empty but loses nothing else
        let mapping = BaseAdapter::from_record(record.clone(), None);
        assert_eq!(mapping.host_ip, "");
        assert_eq!(mapping.public_ip, "");
        assert_eq!(BaseAdapter::to_record(&mapping), record);
    }

    #[test]
    fn test_validate_port_bounds() {
        assert_eq!(BaseAdapter::validate_port(1, "guestPort").unwrap(), 1);
        assert_eq!(BaseAdapter::validate_port(65535, "guestPort").unwrap(), 65535);
        assert!(matches!(
            BaseAdapter::validate_port(0, "guestPort"),
            Err(PortgridError::Validation { .. })
        ));
        assert!(matches!(
            BaseAdapter::validate_port(70000, "guestPort"),
            Err(PortgridError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_protocol_defaults_to_tcp() {
        assert_eq!(BaseAdapter::validate_protocol(None).unwrap(), Protocol::Tcp);
        assert_eq!(BaseAdapter::validate_protocol(Some("")).unwrap(), Protocol::Tcp);
        assert_eq!(BaseAdapter::validate_protocol(Some("udp")).unwrap(), Protocol::Udp);
        assert!(BaseAdapter::validate_protocol(Some("icmp")).is_err());
    }
}
