//! State management with SQLite persistence.
//!
//! The StateManager handles all persistent state for portgrid:
//! - Port mappings (the desired state consumed by the network reconciler)
//! - Bulk tasks and their progress accounting
//! - The provider/instance directory read model
//!
//! The partial unique index on active (provider_id, protocol, host_port)
//! rows is the authoritative guard against allocation races; a unique
//! violation surfaces as `PortConflict` so allocators can retry.

use crate::error::{PortgridError, Result};
use crate::tasks::{BulkTask, BulkTaskStatus, TaskPage, TaskQuery};
use crate::types::{
    Instance, MappingRecord, MappingStatus, MethodPreference, Protocol, Provider,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, QueryBuilder, Row};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, instrument};

pub mod migrations;


/// Default page size for task listings when the caller passes 0.
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound on task listing page size.
const MAX_PAGE_SIZE: u32 = 100;

/// State manager for persistent storage.
#[derive(Clone)]
pub struct StateManager {
    pool: SqlitePool,
}

impl StateManager {
    /// Create a new StateManager with an in-memory database (for tests).
    pub async fn new_in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    /// Get a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a new StateManager with a database at the specified path.
    #[instrument(skip(db_path))]
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("Initializing state manager at {:?}", db_path);

        let in_memory = db_path == Path::new(":memory:");

        // Create parent directory if it doesn't exist (but not for :memory:)
        if !in_memory {
            if let Some(parent) = db_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PortgridError::InvalidConfig {
                        reason: format!("Failed to create directory {}: {}", parent.display(), e),
                    }
                })?;
            }
        }

        // Configure SQLite connection
        let mut options = SqliteConnectOptions::from_str(db_path.to_str().ok_or_else(|| {
            PortgridError::InvalidConfig { reason: "Invalid database path".to_string() }
        })?)
        .map_err(|e| PortgridError::Database(e.to_string()))?;

        options = options.create_if_missing(true).log_statements(tracing::log::LevelFilter::Debug);

        // An in-memory SQLite database exists per connection, so the pool
        // must be pinned to a single connection to share state.
        let max_connections = if in_memory { 1 } else { 5 };

        // Create connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?;

        let manager = Self { pool };

        // Run migrations
        manager.run_migrations().await?;

        info!("State manager initialized successfully");
        Ok(manager)
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        migrations::run(&self.pool).await?;
        info!("Database migrations complete");
        Ok(())
    }

    // ========================
    // Provider Directory
    // ========================

    /// Insert a provider record. Used for seeding and tests; the panel
    /// owns provider writes in production.
    #[instrument(skip(self), fields(kind = %provider.kind))]
    pub async fn insert_provider(&self, provider: &Provider) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO providers (name, kind, endpoint, port_ip, ipv4_method, ipv6_method, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&provider.name)
        .bind(&provider.kind)
        .bind(&provider.endpoint)
        .bind(&provider.port_ip)
        .bind(provider.ipv4_method.map(|m| m.as_str()))
        .bind(provider.ipv6_method.map(|m| m.as_str()))
        .bind(provider.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::counter!("portgrid_db_errors_total", "operation" => "insert_provider")
                .increment(1);
            PortgridError::Database(e.to_string())
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Get a provider by ID.
    #[instrument(skip(self), fields(provider_id = %id))]
    pub async fn get_provider(&self, id: i64) -> Result<Provider> {
        let row = sqlx::query("SELECT * FROM providers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?
            .ok_or(PortgridError::ProviderNotFound { provider_id: id })?;

        Self::row_to_provider(row)
    }

    /// Insert an instance record. Used for seeding and tests.
    #[instrument(skip(self), fields(instance_id = %instance.id))]
    pub async fn insert_instance(&self, instance: &Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (id, provider_id, name, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&instance.id)
        .bind(instance.provider_id)
        .bind(&instance.name)
        .bind(instance.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::counter!("portgrid_db_errors_total", "operation" => "insert_instance")
                .increment(1);
            PortgridError::Database(e.to_string())
        })?;

        Ok(())
    }

    /// Get an instance by ID.
    #[instrument(skip(self), fields(instance_id = %id))]
    pub async fn get_instance(&self, id: &str) -> Result<Instance> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?
            .ok_or_else(|| PortgridError::InstanceNotFound { instance_id: id.to_string() })?;

        Self::row_to_instance(row)
    }

    /// List all instances belonging to a provider.
    #[instrument(skip(self), fields(provider_id = %provider_id))]
    pub async fn list_instances(&self, provider_id: i64) -> Result<Vec<Instance>> {
        let rows = sqlx::query("SELECT * FROM instances WHERE provider_id = ? ORDER BY id")
            .bind(provider_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_instance).collect()
    }

    // ========================
    // Port Mappings
    // ========================

    /// Insert a new port mapping and return it with its assigned ID.
    ///
    /// A unique violation on the active-endpoint index maps to
    /// `PortConflict`; callers performing auto-allocation retry on it.
    #[instrument(skip(self), fields(instance_id = %record.instance_id, host_port = record.host_port))]
    pub async fn insert_mapping(&self, record: &MappingRecord) -> Result<MappingRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO port_mappings (
                instance_id, provider_id, protocol, host_port, guest_port,
                ipv6_address, status, mapping_method, is_ssh, is_automatic,
                description, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.instance_id)
        .bind(record.provider_id)
        .bind(record.protocol.as_str())
        .bind(record.host_port as i64)
        .bind(record.guest_port as i64)
        .bind(&record.ipv6_address)
        .bind(record.status.as_str())
        .bind(&record.mapping_method)
        .bind(record.is_ssh as i64)
        .bind(record.is_automatic as i64)
        .bind(&record.description)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::classify_mapping_err(e, record.host_port, "insert_mapping"))?;

        let mut inserted = record.clone();
        inserted.id = result.last_insert_rowid();
        Ok(inserted)
    }

    /// Get a port mapping by ID.
    #[instrument(skip(self), fields(mapping_id = %id))]
    pub async fn get_mapping(&self, id: i64) -> Result<MappingRecord> {
        let row = sqlx::query("SELECT * FROM port_mappings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?
            .ok_or(PortgridError::MappingNotFound { id })?;

        Self::row_to_mapping(row)
    }

    /// List every mapping for an instance.
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn list_instance_mappings(&self, instance_id: &str) -> Result<Vec<MappingRecord>> {
        let rows = sqlx::query("SELECT * FROM port_mappings WHERE instance_id = ? ORDER BY id")
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_mapping).collect()
    }

    /// Host ports currently held by active mappings for a provider and
    /// protocol. The allocator scans this set to pick candidates; it is
    /// advisory only, the unique index is the real guard.
    #[instrument(skip(self), fields(provider_id = %provider_id))]
    pub async fn list_active_host_ports(
        &self,
        provider_id: i64,
        protocol: Protocol,
    ) -> Result<Vec<u16>> {
        let rows = sqlx::query(
            r#"
            SELECT host_port FROM port_mappings
            WHERE provider_id = ? AND protocol = ? AND status = 'active'
            "#,
        )
        .bind(provider_id)
        .bind(protocol.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortgridError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(|row| row.get::<i64, _>("host_port") as u16).collect())
    }

    /// Apply the updatable mapping fields in a single atomic write. The
    /// mapping method rides along so updates can refresh it from current
    /// provider state.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, description, mapping_method), fields(mapping_id = %id))]
    pub async fn update_mapping_fields(
        &self,
        id: i64,
        host_port: u16,
        guest_port: u16,
        protocol: Protocol,
        description: &str,
        status: MappingStatus,
        mapping_method: &str,
        updated_at: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE port_mappings
            SET host_port = ?, guest_port = ?, protocol = ?, description = ?,
                status = ?, mapping_method = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(host_port as i64)
        .bind(guest_port as i64)
        .bind(protocol.as_str())
        .bind(description)
        .bind(status.as_str())
        .bind(mapping_method)
        .bind(updated_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::classify_mapping_err(e, host_port, "update_mapping"))?;

        if result.rows_affected() == 0 {
            return Err(PortgridError::MappingNotFound { id });
        }

        Ok(())
    }

    /// Change a mapping's status. Activation can collide with the
    /// active-endpoint index and surfaces as `PortConflict`.
    #[instrument(skip(self, mapping), fields(mapping_id = %mapping.id, status = %status))]
    pub async fn set_mapping_status(
        &self,
        mapping: &MappingRecord,
        status: MappingStatus,
        updated_at: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE port_mappings SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(updated_at)
            .bind(mapping.id)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::classify_mapping_err(e, mapping.host_port, "set_mapping_status"))?;

        Ok(())
    }

    /// Delete a port mapping (hard removal).
    #[instrument(skip(self), fields(mapping_id = %id))]
    pub async fn delete_mapping(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM port_mappings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                metrics::counter!("portgrid_db_errors_total", "operation" => "delete_mapping")
                    .increment(1);
                PortgridError::Database(e.to_string())
            })?;

        Ok(())
    }

    /// Delete every mapping for an instance. Returns the removed count.
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn delete_instance_mappings(&self, instance_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM port_mappings WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                metrics::counter!("portgrid_db_errors_total", "operation" => "delete_instance_mappings")
                    .increment(1);
                PortgridError::Database(e.to_string())
            })?;

        Ok(result.rows_affected())
    }

    // ========================
    // Bulk Tasks
    // ========================

    /// Insert a new pending bulk task, returning its ID.
    #[instrument(skip(self), fields(provider_id = %provider_id, task_type = %task_type))]
    pub async fn insert_task(
        &self,
        provider_id: i64,
        task_type: &str,
        created_at: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO bulk_tasks (provider_id, task_type, status, created_at)
            VALUES (?, ?, 'pending', ?)
            "#,
        )
        .bind(provider_id)
        .bind(task_type)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::counter!("portgrid_db_errors_total", "operation" => "insert_task").increment(1);
            PortgridError::Database(e.to_string())
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Insert a bulk task already in the failed state. Used when the
    /// requested operation is rejected up front and never runs.
    #[instrument(skip(self, error_msg), fields(provider_id = %provider_id, task_type = %task_type))]
    pub async fn insert_failed_task(
        &self,
        provider_id: i64,
        task_type: &str,
        error_msg: &str,
        created_at: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO bulk_tasks (provider_id, task_type, status, error_msg, created_at, completed_at)
            VALUES (?, ?, 'failed', ?, ?, ?)
            "#,
        )
        .bind(provider_id)
        .bind(task_type)
        .bind(error_msg)
        .bind(created_at)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::counter!("portgrid_db_errors_total", "operation" => "insert_task").increment(1);
            PortgridError::Database(e.to_string())
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Get a bulk task by ID.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn get_task(&self, id: i64) -> Result<BulkTask> {
        let row = sqlx::query("SELECT * FROM bulk_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?
            .ok_or(PortgridError::TaskNotFound { id })?;

        Self::row_to_task(row)
    }

    /// Transition a task from pending to running, recording the start
    /// time and the instance count.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn mark_task_running(
        &self,
        id: i64,
        started_at: i64,
        total_count: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_tasks
            SET status = 'running', started_at = ?, total_count = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(started_at)
        .bind(total_count)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortgridError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, BulkTaskStatus::Running).await);
        }

        Ok(())
    }

    /// Record per-instance progress: counters, the computed progress
    /// value, and an appended output line. Progress never regresses.
    #[instrument(skip(self, output_line), fields(task_id = %id))]
    pub async fn update_task_progress(
        &self,
        id: i64,
        progress: i64,
        success_count: i64,
        failed_count: i64,
        output_line: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_tasks
            SET progress = MAX(progress, ?), success_count = ?, failed_count = ?,
                output = output || ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(progress)
        .bind(success_count)
        .bind(failed_count)
        .bind(output_line)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortgridError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(PortgridError::TaskNotFound { id });
        }

        Ok(())
    }

    /// Transition a running task to completed.
    #[instrument(skip(self), fields(task_id = %id))]
    pub async fn mark_task_completed(&self, id: i64, completed_at: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_tasks
            SET status = 'completed', progress = 100, completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortgridError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, BulkTaskStatus::Completed).await);
        }

        metrics::counter!("portgrid_tasks_total", "status" => "completed").increment(1);
        Ok(())
    }

    /// Transition a task to failed with a task-level error message.
    /// Accumulated counters and output are preserved. A pending task may
    /// fail directly when its body cannot start at all.
    #[instrument(skip(self, error_msg), fields(task_id = %id))]
    pub async fn mark_task_failed(
        &self,
        id: i64,
        completed_at: i64,
        error_msg: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_tasks
            SET status = 'failed', error_msg = ?, completed_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(error_msg)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortgridError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, BulkTaskStatus::Failed).await);
        }

        metrics::counter!("portgrid_tasks_total", "status" => "failed").increment(1);
        Ok(())
    }

    /// List bulk tasks with pagination and optional filters.
    #[instrument(skip(self, query))]
    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskPage> {
        let page_size = match query.page_size {
            0 => DEFAULT_PAGE_SIZE,
            s if s > MAX_PAGE_SIZE => {
                return Err(PortgridError::Validation {
                    reason: format!("pageSize must not exceed {}", MAX_PAGE_SIZE),
                })
            }
            s => s,
        };
        let page = query.page.max(1);
        let offset = (page as i64 - 1) * page_size as i64;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM bulk_tasks WHERE 1=1");
        Self::push_task_filters(&mut count_qb, query);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?;

        let mut qb = QueryBuilder::new("SELECT * FROM bulk_tasks WHERE 1=1");
        Self::push_task_filters(&mut qb, query);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortgridError::Database(e.to_string()))?;

        let tasks = rows.into_iter().map(Self::row_to_task).collect::<Result<Vec<_>>>()?;

        Ok(TaskPage { tasks, total })
    }

    fn push_task_filters(qb: &mut QueryBuilder<'_, sqlx::Sqlite>, query: &TaskQuery) {
        if let Some(provider_id) = query.provider_id {
            qb.push(" AND provider_id = ").push_bind(provider_id);
        }
        if let Some(ref task_type) = query.task_type {
            qb.push(" AND task_type = ").push_bind(task_type.clone());
        }
        if let Some(ref status) = query.status {
            qb.push(" AND status = ").push_bind(status.clone());
        }
    }

    /// Build the InvalidTransition error for a guarded update that
    /// matched no row.
    async fn transition_error(&self, id: i64, to: BulkTaskStatus) -> PortgridError {
        match self.get_task(id).await {
            Ok(task) => PortgridError::InvalidTransition {
                from: task.status.to_string(),
                to: to.to_string(),
            },
            Err(e) => e,
        }
    }

    // ========================
    // Row decoders
    // ========================

    fn classify_mapping_err(e: sqlx::Error, port: u16, operation: &'static str) -> PortgridError {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PortgridError::PortConflict { port }
            }
            _ => {
                metrics::counter!("portgrid_db_errors_total", "operation" => operation)
                    .increment(1);
                PortgridError::Database(e.to_string())
            }
        }
    }

    fn row_to_provider(row: sqlx::sqlite::SqliteRow) -> Result<Provider> {
        let ipv4_method: Option<String> = row.get("ipv4_method");
        let ipv6_method: Option<String> = row.get("ipv6_method");

        Ok(Provider {
            id: row.get("id"),
            name: row.get("name"),
            kind: row.get("kind"),
            endpoint: row.get("endpoint"),
            port_ip: row.get("port_ip"),
            ipv4_method: ipv4_method.as_deref().and_then(MethodPreference::parse),
            ipv6_method: ipv6_method.as_deref().and_then(MethodPreference::parse),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_instance(row: sqlx::sqlite::SqliteRow) -> Result<Instance> {
        Ok(Instance {
            id: row.get("id"),
            provider_id: row.get("provider_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_mapping(row: sqlx::sqlite::SqliteRow) -> Result<MappingRecord> {
        let protocol: String = row.get("protocol");
        let status: String = row.get("status");

        Ok(MappingRecord {
            id: row.get("id"),
            instance_id: row.get("instance_id"),
            provider_id: row.get("provider_id"),
            protocol: protocol.parse().unwrap_or_default(),
            host_port: row.get::<i64, _>("host_port") as u16,
            guest_port: row.get::<i64, _>("guest_port") as u16,
            ipv6_address: row.get("ipv6_address"),
            status: MappingStatus::parse(&status),
            mapping_method: row.get("mapping_method"),
            is_ssh: row.get::<i64, _>("is_ssh") != 0,
            is_automatic: row.get::<i64, _>("is_automatic") != 0,
            description: row.get("description"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_task(row: sqlx::sqlite::SqliteRow) -> Result<BulkTask> {
        let status: String = row.get("status");

        Ok(BulkTask {
            id: row.get("id"),
            provider_id: row.get("provider_id"),
            task_type: row.get("task_type"),
            status: BulkTaskStatus::parse(&status),
            progress: row.get("progress"),
            total_count: row.get("total_count"),
            success_count: row.get("success_count"),
            failed_count: row.get("failed_count"),
            output: row.get("output"),
            error_msg: row.get("error_msg"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}
