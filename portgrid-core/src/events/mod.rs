//! Event bus for portgrid system events.
//!
//! Provides a publish/subscribe mechanism for mapping lifecycle changes
//! and bulk-task progress, so callers can follow a running task on a
//! stream instead of polling the store.
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new();
//!
//! // Subscribe to task events
//! let mut rx = bus.subscribe(vec!["task.*".to_string()]);
//!
//! // Publish an event
//! bus.publish(Event::new(EventType::TaskStarted, "17", "bulk task started"));
//!
//! // Receive events
//! while let Some(event) = rx.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! ```

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of events buffered in the broadcast channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// Event types for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Mapping events
    MappingCreated,
    MappingUpdated,
    MappingDeleted,

    // Bulk task events
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
}

impl EventType {
    /// Get the event type string (e.g., "task.started").
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MappingCreated => "mapping.created",
            EventType::MappingUpdated => "mapping.updated",
            EventType::MappingDeleted => "mapping.deleted",
            EventType::TaskStarted => "task.started",
            EventType::TaskProgress => "task.progress",
            EventType::TaskCompleted => "task.completed",
            EventType::TaskFailed => "task.failed",
        }
    }

    /// Get the resource type (e.g., "mapping", "task").
    pub fn resource_type(&self) -> &'static str {
        match self {
            EventType::MappingCreated | EventType::MappingUpdated | EventType::MappingDeleted => {
                "mapping"
            }
            EventType::TaskStarted
            | EventType::TaskProgress
            | EventType::TaskCompleted
            | EventType::TaskFailed => "task",
        }
    }

    /// Get the action (e.g., "created", "progress").
    pub fn action(&self) -> &'static str {
        match self {
            EventType::MappingCreated => "created",
            EventType::MappingUpdated => "updated",
            EventType::MappingDeleted => "deleted",
            EventType::TaskStarted => "started",
            EventType::TaskProgress => "progress",
            EventType::TaskCompleted => "completed",
            EventType::TaskFailed => "failed",
        }
    }
}

/// A system event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Event type string (e.g., "task.started")
    pub event_type: String,
    /// Resource type (e.g., "mapping", "task")
    pub resource_type: String,
    /// Resource ID
    pub resource_id: String,
    /// Action (e.g., "started", "completed")
    pub action: String,
    /// Human-readable message
    pub message: String,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new event.
    pub fn new(event_type: EventType, resource_id: &str, message: &str) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
            event_type: event_type.as_str().to_string(),
            resource_type: event_type.resource_type().to_string(),
            resource_id: resource_id.to_string(),
            action: event_type.action().to_string(),
            message: message.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the event.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Event bus for publishing and subscribing to system events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: Event) {
        debug!(event_type = %event.event_type, resource_id = %event.resource_id, "Publishing event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events, optionally filtered by event type patterns.
    ///
    /// # Filter patterns
    ///
    /// - `"task.*"` - All bulk task events
    /// - `"mapping.*"` - All mapping events
    /// - `"task.progress"` - Only progress events
    /// - Empty list - All events
    pub fn subscribe(&self, filters: Vec<String>) -> EventSubscriber {
        EventSubscriber { receiver: self.sender.subscribe(), filters }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event subscriber with optional filtering.
pub struct EventSubscriber {
    receiver: broadcast::Receiver<Event>,
    filters: Vec<String>,
}

impl EventSubscriber {
    /// Receive the next event (blocking).
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                    // Event doesn't match filters, continue
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Event subscriber lagged by {} events", n);
                    // Continue receiving
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    }

    /// Check if an event matches the filters.
    fn matches(&self, event: &Event) -> bool {
        // Empty filters = all events
        if self.filters.is_empty() {
            return true;
        }

        for filter in &self.filters {
            // Exact match
            if filter == &event.event_type {
                return true;
            }

            // Wildcard match (e.g., "task.*")
            if filter.ends_with(".*") {
                let prefix = &filter[..filter.len() - 2];
                if event.event_type.starts_with(prefix) {
                    return true;
                }
            }
        }

        false
    }
}
