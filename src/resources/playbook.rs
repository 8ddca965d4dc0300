//! Playbook run work order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::{Object, Resource};

/// A persisted playbook run
pub type PlaybookRun = Object<PlaybookSpec, PlaybookStatus>;

/// What to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybookSpec {
    pub playbook: String,
    pub tags: Vec<String>,
    pub skip_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<String>,
}

impl Resource for PlaybookSpec {
    const KIND: &'static str = "Playbook";
}

/// Lifecycle phase of a playbook run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybookPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for PlaybookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybookPhase::Pending => "Pending",
            PlaybookPhase::Running => "Running",
            PlaybookPhase::Succeeded => "Succeeded",
            PlaybookPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Aggregate counters of finished tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskCounters {
    pub total: u32,
    pub success: u32,
    pub failed: u32,
    pub ignored: u32,
}

/// Output of one host of a failed task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedHost {
    pub host: String,
    pub stdout: String,
    pub stderr: String,
}

/// A task that failed the run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedDetail {
    pub task: String,
    pub hosts: Vec<FailedHost>,
}

/// Observed state of a playbook run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybookStatus {
    pub phase: PlaybookPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    pub task_result: TaskCounters,
    pub failed_detail: Vec<FailedDetail>,
}

/// Reason recorded when a task failure ends the run
pub const REASON_TASK_FAILED: &str = "TaskFailed";
/// Reason recorded when the run stops for any other error
pub const REASON_EXECUTOR_ERROR: &str = "ExecutorError";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_defaults_deserialize() {
        let status: PlaybookStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status.phase, PlaybookPhase::Pending);
        assert_eq!(status.task_result, TaskCounters::default());
    }

    #[test]
    fn test_status_field_names() {
        let status = PlaybookStatus {
            phase: PlaybookPhase::Failed,
            failure_reason: Some(REASON_TASK_FAILED.into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["phase"], "Failed");
        assert_eq!(value["failureReason"], "TaskFailed");
        assert!(value["taskResult"].is_object());
    }
}
