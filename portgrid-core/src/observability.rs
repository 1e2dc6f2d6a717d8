//! Observability infrastructure: tracing and metrics.
//!
//! The embedding process owns exporter wiring (Prometheus endpoint,
//! trace collection); this module only installs the subscriber and
//! declares the metrics the crate emits.

use metrics::describe_counter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber and register core metrics.
///
/// Call once at process startup before any other operations.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()?;

    register_core_metrics();

    tracing::info!("Observability initialized");
    Ok(())
}

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    describe_counter!(
        "portgrid_mappings_created_total",
        "Total number of port mappings created (by backend)"
    );
    describe_counter!(
        "portgrid_mappings_deleted_total",
        "Total number of port mappings deleted (by backend)"
    );
    describe_counter!(
        "portgrid_ports_allocated_total",
        "Host port allocation attempts (by status: success, conflict)"
    );
    describe_counter!(
        "portgrid_task_instances_total",
        "Per-instance bulk task actions (by result: success, failed)"
    );
    describe_counter!(
        "portgrid_tasks_total",
        "Bulk tasks reaching a terminal state (by status: completed, failed)"
    );
    describe_counter!(
        "portgrid_db_errors_total",
        "Total database operation failures (by operation)"
    );
}
