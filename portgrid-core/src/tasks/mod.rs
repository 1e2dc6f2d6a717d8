//! Bulk task types and the execution engine.
//!
//! A bulk task tracks one fleet-wide operation (enable/disable/detect)
//! applied across every instance of a provider, with progress and
//! partial-failure accounting.

use serde::{Deserialize, Serialize};

pub mod engine;

pub use engine::BulkTaskEngine;

/// Status of a bulk task. Transitions are strictly forward:
/// pending -> running -> completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BulkTaskStatus {
    /// Accepted but not yet started.
    #[default]
    Pending,
    /// Currently iterating instances.
    Running,
    /// All instances processed. Per-instance failures do not prevent
    /// completion.
    Completed,
    /// A task-level fatal condition stopped the run, or the request was
    /// rejected up front.
    Failed,
}

impl BulkTaskStatus {
    /// Parse status from string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => BulkTaskStatus::Pending,
            "running" => BulkTaskStatus::Running,
            "completed" => BulkTaskStatus::Completed,
            "failed" => BulkTaskStatus::Failed,
            _ => BulkTaskStatus::Pending,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkTaskStatus::Pending => "pending",
            BulkTaskStatus::Running => "running",
            BulkTaskStatus::Completed => "completed",
            BulkTaskStatus::Failed => "failed",
        }
    }

    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BulkTaskStatus::Completed | BulkTaskStatus::Failed)
    }
}

impl std::fmt::Display for BulkTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of fleet-wide operation a bulk task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkTaskType {
    EnableAll,
    DisableAll,
    DetectAll,
}

impl BulkTaskType {
    /// Map a trigger operation string to a task type.
    pub fn from_operation(op: &str) -> Option<Self> {
        match op {
            "enable" => Some(BulkTaskType::EnableAll),
            "disable" => Some(BulkTaskType::DisableAll),
            "detect" => Some(BulkTaskType::DetectAll),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkTaskType::EnableAll => "enable_all",
            BulkTaskType::DisableAll => "disable_all",
            BulkTaskType::DetectAll => "detect_all",
        }
    }
}

impl std::fmt::Display for BulkTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution record of a fleet-wide operation.
///
/// Retained after completion for audit and listing. `task_type` is kept
/// as a string so a rejected trigger can record the operation that was
/// actually requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTask {
    pub id: i64,
    pub provider_id: i64,
    pub task_type: String,
    pub status: BulkTaskStatus,

    /// Completion percentage in [0,100], non-decreasing.
    pub progress: i64,

    pub total_count: i64,
    pub success_count: i64,
    pub failed_count: i64,

    /// Append-only cumulative log, one line per instance.
    pub output: String,

    /// Set only for a task-level fatal failure; per-instance failures are
    /// folded into `failed_count` instead.
    pub error_msg: Option<String>,

    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Filterable, paginated task listing query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskQuery {
    /// 1-based page number. 0 is treated as 1.
    pub page: u32,
    /// Page size, at most 100. 0 selects the default.
    pub page_size: u32,
    pub provider_id: Option<i64>,
    pub task_type: Option<String>,
    pub status: Option<String>,
}

/// One page of bulk tasks plus the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    pub tasks: Vec<BulkTask>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_task_status_parse() {
        assert_eq!(BulkTaskStatus::parse("pending"), BulkTaskStatus::Pending);
        assert_eq!(BulkTaskStatus::parse("RUNNING"), BulkTaskStatus::Running);
        assert_eq!(BulkTaskStatus::parse("completed"), BulkTaskStatus::Completed);
        assert_eq!(BulkTaskStatus::parse("failed"), BulkTaskStatus::Failed);
        assert_eq!(BulkTaskStatus::parse("unknown"), BulkTaskStatus::Pending);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!BulkTaskStatus::Pending.is_terminal());
        assert!(!BulkTaskStatus::Running.is_terminal());
        assert!(BulkTaskStatus::Completed.is_terminal());
        assert!(BulkTaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_task_type_from_operation() {
        assert_eq!(BulkTaskType::from_operation("enable"), Some(BulkTaskType::EnableAll));
        assert_eq!(BulkTaskType::from_operation("disable"), Some(BulkTaskType::DisableAll));
        assert_eq!(BulkTaskType::from_operation("detect"), Some(BulkTaskType::DetectAll));
        assert_eq!(BulkTaskType::from_operation("restart"), None);
        assert_eq!(BulkTaskType::from_operation("ENABLE"), None);
    }
}
