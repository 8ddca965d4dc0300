//! Task work order.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::store::{Object, Resource};

/// Annotation naming the role a task was created from
pub const ROLE_ANNOTATION: &str = "kubeplay.io/role";

/// A task work order: one flattened leaf block for a set of hosts.
pub type Task = Object<TaskSpec, TaskStatus>;

/// Module invocation of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    #[serde(default)]
    pub args: JsonValue,
}

/// What a task runs and on which hosts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskSpec {
    pub name: String,
    pub hosts: Vec<String>,
    pub module: ModuleRef,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<JsonValue>,
    pub when: Vec<String>,
    pub failed_when: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,
    pub ignore_errors: bool,
    pub retries: u32,
}

impl Resource for TaskSpec {
    const KIND: &'static str = "Task";
}

/// Lifecycle phase of a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPhase {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Ignored,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPhase::Pending => "Pending",
            TaskPhase::Running => "Running",
            TaskPhase::Success => "Success",
            TaskPhase::Failed => "Failed",
            TaskPhase::Ignored => "Ignored",
        };
        f.write_str(s)
    }
}

/// Outcome of one loop iteration on one host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopItemResult {
    pub item: JsonValue,
    pub stdout: String,
    pub stderr: String,
    pub error: String,
}

/// Outcome of a task on one host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskHostResult {
    pub host: String,
    pub stdout: String,
    pub stderr: String,
    pub error: String,
    pub items: Vec<LoopItemResult>,
}

impl TaskHostResult {
    /// Whether the host reported an error
    pub fn is_failed(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Observed state of a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskStatus {
    pub phase: TaskPhase,
    pub restart_count: u32,
    pub host_results: Vec<TaskHostResult>,
}

impl Object<TaskSpec, TaskStatus> {
    /// Terminal failure: failed and out of retries
    pub fn is_failed(&self) -> bool {
        self.status.phase == TaskPhase::Failed && self.status.restart_count >= self.spec.retries
    }

    /// Whether the drive loop may stop
    pub fn is_complete(&self) -> bool {
        matches!(self.status.phase, TaskPhase::Success | TaskPhase::Ignored) || self.is_failed()
    }

    /// Role the task was created from, if any
    pub fn role(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(ROLE_ANNOTATION)
            .map(String::as_str)
    }

    /// Human readable failure report listing every failed host and its loop
    /// iterations.
    pub fn failure_message(&self) -> String {
        let mut msg = format!("task \"{}\" run failed:", self.spec.name);
        for result in self.status.host_results.iter().filter(|r| r.is_failed()) {
            msg.push_str(&format!("\n[{}]: {}", result.host, result.error));
            for item in &result.items {
                msg.push_str(&format!(
                    "\n  - item: {} stdout: {} stderr: {} error: {}",
                    item.item, item.stdout, item.stderr, item.error
                ));
            }
        }
        msg
    }
}
