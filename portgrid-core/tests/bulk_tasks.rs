//! Integration tests for the bulk task engine.
//!
//! Exercises the progress/partial-failure state machine end to end:
//! per-instance isolation, monotonic progress observed on the event
//! stream, and the audit listing.

use portgrid_core::{
    AdapterRegistry, AllocatorConfig, BulkTaskEngine, BulkTaskStatus, EventBus, Instance,
    MappingRecord, MappingStatus, Protocol, Provider, StateManager, TaskQuery,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

async fn setup() -> (Arc<StateManager>, BulkTaskEngine, EventBus, i64) {
    let state = Arc::new(StateManager::new_in_memory().await.unwrap());
    let provider_id = state
        .insert_provider(&Provider {
            id: 0,
            name: "incus-fleet".to_string(),
            kind: "incus".to_string(),
            endpoint: "203.0.113.60".to_string(),
            port_ip: None,
            ipv4_method: None,
            ipv6_method: None,
            created_at: now(),
        })
        .await
        .unwrap();

    let events = EventBus::new();
    let engine = BulkTaskEngine::new(
        state.clone(),
        Arc::new(AdapterRegistry::builtin()),
        AllocatorConfig::default(),
        events.clone(),
    );
    (state, engine, events, provider_id)
}

async fn seed_instances(state: &StateManager, provider_id: i64, count: usize) {
    for i in 0..count {
        state
            .insert_instance(&Instance {
                id: format!("inst-{}", i),
                provider_id,
                name: format!("guest-{}", i),
                created_at: now(),
            })
            .await
            .unwrap();
    }
}

fn mapping(
    provider_id: i64,
    instance_id: &str,
    host_port: u16,
    status: MappingStatus,
) -> MappingRecord {
    MappingRecord {
        id: 0,
        instance_id: instance_id.to_string(),
        provider_id,
        protocol: Protocol::Tcp,
        host_port,
        guest_port: 80,
        ipv6_address: None,
        status,
        mapping_method: "incus-device-proxy".to_string(),
        is_ssh: false,
        is_automatic: false,
        description: String::new(),
        created_at: now(),
        updated_at: now(),
    }
}

async fn wait_terminal(engine: &BulkTaskEngine, id: i64) -> portgrid_core::BulkTask {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let task = engine.get(id).await.unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task did not reach a terminal state")
}

#[tokio::test]
async fn test_enable_all_with_partial_failures() {
    let (state, engine, _events, provider_id) = setup().await;
    seed_instances(&state, provider_id, 10).await;

    // Every instance has one inactive mapping to re-activate
    for i in 0..10u16 {
        state
            .insert_mapping(&mapping(
                provider_id,
                &format!("inst-{}", i),
                21000 + i,
                MappingStatus::Inactive,
            ))
            .await
            .unwrap();
    }

    // Three of the ports were claimed by other workloads in the meantime
    for i in 0..3u16 {
        state
            .insert_mapping(&mapping(
                provider_id,
                &format!("blocker-{}", i),
                21000 + i,
                MappingStatus::Active,
            ))
            .await
            .unwrap();
    }

    let id = engine.trigger(provider_id, "enable").await.unwrap();
    let task = wait_terminal(&engine, id).await;

    // Partial failure is not task failure
    assert_eq!(task.status, BulkTaskStatus::Completed);
    assert_eq!(task.total_count, 10);
    assert_eq!(task.success_count, 7);
    assert_eq!(task.failed_count, 3);
    assert_eq!(task.success_count + task.failed_count, task.total_count);
    assert_eq!(task.progress, 100);
    assert!(task.error_msg.is_none());
    assert!(task.output.contains("failed"));
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());

    // The seven unblocked instances are active again
    for i in 3..10u16 {
        let mappings =
            state.list_instance_mappings(&format!("inst-{}", i)).await.unwrap();
        assert_eq!(mappings[0].status, MappingStatus::Active);
    }
    // The blocked ones stayed inactive
    for i in 0..3u16 {
        let mappings =
            state.list_instance_mappings(&format!("inst-{}", i)).await.unwrap();
        assert_eq!(mappings[0].status, MappingStatus::Inactive);
    }
}

#[tokio::test]
async fn test_disable_then_enable_cycle() {
    let (state, engine, _events, provider_id) = setup().await;
    seed_instances(&state, provider_id, 4).await;

    for i in 0..4u16 {
        state
            .insert_mapping(&mapping(
                provider_id,
                &format!("inst-{}", i),
                22000 + i,
                MappingStatus::Active,
            ))
            .await
            .unwrap();
    }

    let id = engine.trigger(provider_id, "disable").await.unwrap();
    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, BulkTaskStatus::Completed);
    assert_eq!(task.success_count, 4);

    for i in 0..4u16 {
        let mappings =
            state.list_instance_mappings(&format!("inst-{}", i)).await.unwrap();
        assert_eq!(mappings[0].status, MappingStatus::Inactive);
    }

    let id = engine.trigger(provider_id, "enable").await.unwrap();
    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, BulkTaskStatus::Completed);
    assert_eq!(task.failed_count, 0);

    for i in 0..4u16 {
        let mappings =
            state.list_instance_mappings(&format!("inst-{}", i)).await.unwrap();
        assert_eq!(mappings[0].status, MappingStatus::Active);
    }
}

#[tokio::test]
async fn test_progress_is_monotonic_on_event_stream() {
    let (state, engine, events, provider_id) = setup().await;
    seed_instances(&state, provider_id, 6).await;

    let mut subscriber = events.subscribe(vec!["task.*".to_string()]);

    let id = engine.trigger(provider_id, "detect").await.unwrap();
    let id_str = id.to_string();

    let mut progress_values = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = subscriber.recv().await {
            if event.resource_id != id_str {
                continue;
            }
            match event.event_type.as_str() {
                "task.progress" => {
                    let value: i64 = event.metadata["progress"].parse().unwrap();
                    progress_values.push(value);
                }
                "task.completed" | "task.failed" => break,
                _ => {}
            }
        }
    })
    .await
    .expect("task events did not finish");

    assert_eq!(progress_values.len(), 6);
    assert!(progress_values.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress_values);
    assert_eq!(*progress_values.last().unwrap(), 100);
    // 100 is only reached by the final instance
    assert!(progress_values[..5].iter().all(|&v| v < 100));

    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, BulkTaskStatus::Completed);
    assert_eq!(task.success_count, 6);
}

#[tokio::test]
async fn test_unsupported_operation_is_visible_in_listing() {
    let (_state, engine, _events, provider_id) = setup().await;

    let id = engine.trigger(provider_id, "reboot").await.unwrap();

    let task = engine.get(id).await.unwrap();
    assert_eq!(task.status, BulkTaskStatus::Failed);
    assert_eq!(task.progress, 0);
    assert_eq!(task.task_type, "reboot");
    assert!(task.error_msg.is_some());

    let page = engine
        .list(&TaskQuery {
            provider_id: Some(provider_id),
            status: Some("failed".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.tasks[0].id, id);
}

#[tokio::test]
async fn test_task_listing_is_retained_for_audit() {
    let (state, engine, _events, provider_id) = setup().await;
    seed_instances(&state, provider_id, 2).await;

    for _ in 0..3 {
        let id = engine.trigger(provider_id, "detect").await.unwrap();
        wait_terminal(&engine, id).await;
    }

    let page = engine
        .list(&TaskQuery {
            provider_id: Some(provider_id),
            task_type: Some("detect_all".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(page.total, 3);
    assert!(page.tasks.iter().all(|t| t.status == BulkTaskStatus::Completed));
}
