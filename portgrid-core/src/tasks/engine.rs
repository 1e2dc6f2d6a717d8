//! Bulk task execution engine.
//!
//! Tasks run asynchronously relative to the triggering call: `trigger`
//! returns the task id immediately and the body iterates the provider's
//! instances on a spawned tokio task. Per-instance failures are folded
//! into the counters and output; only a condition that prevents the run
//! from continuing marks the task failed. The invoking layer is
//! responsible for keeping at most one active task per provider.

use crate::adapters::{AdapterRegistry, AllocatorConfig, MappingAdapter};
use crate::error::Result;
use crate::events::{Event, EventBus, EventType};
use crate::state::StateManager;
use crate::tasks::{BulkTask, BulkTaskType, TaskPage, TaskQuery};
use crate::types::now_ts;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Engine owning bulk task execution and bookkeeping.
#[derive(Clone)]
pub struct BulkTaskEngine {
    state: Arc<StateManager>,
    registry: Arc<AdapterRegistry>,
    allocator: AllocatorConfig,
    events: EventBus,
}

impl BulkTaskEngine {
    /// Create a new bulk task engine.
    pub fn new(
        state: Arc<StateManager>,
        registry: Arc<AdapterRegistry>,
        allocator: AllocatorConfig,
        events: EventBus,
    ) -> Self {
        Self { state, registry, allocator, events }
    }

    /// Accept a bulk operation and return its task id immediately.
    ///
    /// An unsupported operation creates the task directly in the failed
    /// state with `error_msg` set; it never runs. The trigger itself
    /// only fails on store errors.
    #[instrument(skip(self), fields(provider_id = provider_id, operation = %operation))]
    pub async fn trigger(&self, provider_id: i64, operation: &str) -> Result<i64> {
        let Some(task_type) = BulkTaskType::from_operation(operation) else {
            let msg = format!("unsupported bulk operation: {}", operation);
            let id =
                self.state.insert_failed_task(provider_id, operation, &msg, now_ts()).await?;
            warn!(task_id = id, "Rejected bulk task");
            self.events.publish(Event::new(EventType::TaskFailed, &id.to_string(), &msg));
            return Ok(id);
        };

        let id = self.state.insert_task(provider_id, task_type.as_str(), now_ts()).await?;
        info!(task_id = id, task_type = %task_type, "Accepted bulk task");

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run(id, provider_id, task_type).await;
        });

        Ok(id)
    }

    /// Get a bulk task by id.
    pub async fn get(&self, id: i64) -> Result<BulkTask> {
        self.state.get_task(id).await
    }

    /// List bulk tasks with pagination and optional filters.
    pub async fn list(&self, query: &TaskQuery) -> Result<TaskPage> {
        self.state.list_tasks(query).await
    }

    /// Task body wrapper: any error escaping the run is task-fatal.
    async fn run(&self, task_id: i64, provider_id: i64, task_type: BulkTaskType) {
        if let Err(e) = self.run_inner(task_id, provider_id, task_type).await {
            warn!(task_id, error = %e, "Bulk task failed");
            match self.state.mark_task_failed(task_id, now_ts(), &e.to_string()).await {
                Ok(()) => {
                    self.events.publish(Event::new(
                        EventType::TaskFailed,
                        &task_id.to_string(),
                        &e.to_string(),
                    ));
                }
                Err(mark_err) => {
                    // The store is unreachable; nothing left to record.
                    error!(task_id, error = %mark_err, "Failed to mark bulk task failed");
                }
            }
        }
    }

    #[instrument(skip(self), fields(task_id = task_id, task_type = %task_type))]
    async fn run_inner(
        &self,
        task_id: i64,
        provider_id: i64,
        task_type: BulkTaskType,
    ) -> Result<()> {
        let provider = self.state.get_provider(provider_id).await?;
        let adapter = self.registry.resolve(
            &provider.kind,
            self.state.clone(),
            self.allocator.clone(),
            self.events.clone(),
        )?;
        let instances = self.state.list_instances(provider_id).await?;
        let total = instances.len() as i64;

        self.state.mark_task_running(task_id, now_ts(), total).await?;
        self.events.publish(Event::new(
            EventType::TaskStarted,
            &task_id.to_string(),
            &format!("{} across {} instances", task_type, total),
        ));

        let mut success = 0i64;
        let mut failed = 0i64;

        for (idx, instance) in instances.iter().enumerate() {
            let outcome = Self::run_instance(adapter.as_ref(), task_type, &instance.id).await;

            let line = match outcome {
                Ok(msg) => {
                    success += 1;
                    metrics::counter!("portgrid_task_instances_total", "result" => "success")
                        .increment(1);
                    format!("{}: {}\n", instance.id, msg)
                }
                Err(e) => {
                    failed += 1;
                    metrics::counter!("portgrid_task_instances_total", "result" => "failed")
                        .increment(1);
                    warn!(instance_id = %instance.id, error = %e, "Instance action failed");
                    format!("{}: failed: {}\n", instance.id, e)
                }
            };

            let completed = idx as i64 + 1;
            let progress = completed * 100 / total;
            self.state.update_task_progress(task_id, progress, success, failed, &line).await?;
            self.events.publish(
                Event::new(
                    EventType::TaskProgress,
                    &task_id.to_string(),
                    &format!("{}/{} instances processed", completed, total),
                )
                .with_metadata("progress", &progress.to_string()),
            );
        }

        self.state.mark_task_completed(task_id, now_ts()).await?;
        info!(task_id, success, failed, total, "Bulk task completed");
        self.events.publish(Event::new(
            EventType::TaskCompleted,
            &task_id.to_string(),
            &format!("{} succeeded, {} failed of {}", success, failed, total),
        ));

        Ok(())
    }

    async fn run_instance(
        adapter: &dyn MappingAdapter,
        task_type: BulkTaskType,
        instance_id: &str,
    ) -> Result<String> {
        match task_type {
            BulkTaskType::EnableAll => adapter.enable_instance(instance_id).await,
            BulkTaskType::DisableAll => adapter.disable_instance(instance_id).await,
            BulkTaskType::DetectAll => adapter.detect_instance(instance_id).await,
        }
    }
}
