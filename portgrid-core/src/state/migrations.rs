//! Database migrations.

use crate::error::{PortgridError, Result};
use sqlx::SqlitePool;
use tracing::{info, instrument};

const SCHEMA_VERSION: i64 = 1;

#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<()> {
    // Create schema_version table if not exists
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    // Get current schema version
    let current_version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    let current_version = current_version.unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    Ok(())
}

#[instrument(skip(pool))]
async fn migrate_to_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration to schema version 1");

    // Providers table (directory read model)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            port_ip TEXT,
            ipv4_method TEXT,
            ipv6_method TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    // Instances table (directory read model)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instances (
            id TEXT PRIMARY KEY,
            provider_id INTEGER NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_instances_provider ON instances(provider_id)")
        .execute(pool)
        .await
        .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    // Port mappings table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS port_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            instance_id TEXT NOT NULL,
            provider_id INTEGER NOT NULL,
            protocol TEXT NOT NULL DEFAULT 'tcp',
            host_port INTEGER NOT NULL,
            guest_port INTEGER NOT NULL,
            ipv6_address TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            mapping_method TEXT NOT NULL,
            is_ssh INTEGER NOT NULL DEFAULT 0,
            is_automatic INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    // The uniqueness guard for the shared port space. Allocation relies on
    // this index rejecting concurrent claims of the same active endpoint.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_port_mappings_active_endpoint
        ON port_mappings(provider_id, protocol, host_port)
        WHERE status = 'active'
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_port_mappings_instance ON port_mappings(instance_id)",
    )
    .execute(pool)
    .await
    .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    // Bulk tasks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bulk_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_id INTEGER NOT NULL,
            task_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            total_count INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            output TEXT NOT NULL DEFAULT '',
            error_msg TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bulk_tasks_provider ON bulk_tasks(provider_id)")
        .execute(pool)
        .await
        .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bulk_tasks_status ON bulk_tasks(status)")
        .execute(pool)
        .await
        .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    // Update schema version
    sqlx::query("DELETE FROM schema_version")
        .execute(pool)
        .await
        .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(1i64)
        .execute(pool)
        .await
        .map_err(|e| PortgridError::MigrationFailed { reason: e.to_string() })?;

    info!("Migration to schema version 1 complete");
    Ok(())
}
