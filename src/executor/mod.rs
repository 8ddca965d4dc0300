//! Playbook execution engine
//!
//! Execution is layered the same way playbooks are written:
//!
//! - [`PlaybookExecutor`] walks plays and host batches,
//! - [`RoleExecutor`] runs a role's dependencies and blocks,
//! - [`BlockExecutor`] applies inherited modifiers and rescue/always,
//! - [`TaskExecutor`] drives one task work order to a terminal phase, fanning
//!   out over the task's hosts in parallel.
//!
//! All layers share one [`ExecutorContext`]. Its cancellation token stops
//! every layer at the next check point.

pub mod block;
pub mod playbook;
pub mod role;
pub mod task;

pub use block::BlockExecutor;
pub use playbook::{PlaybookExecutor, PlaybookReport};
pub use role::RoleExecutor;
pub use task::TaskExecutor;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionError, ConnectorFactory, DefaultConnectorFactory};
use crate::modules::{ModuleError, ModuleRegistry};
use crate::output::ProgressLog;
use crate::playbook::ParseError;
use crate::project::FileSource;
use crate::resources::{FailedDetail, TaskCounters};
use crate::store::{ObjectKey, SharedStore, StoreError, DEFAULT_NAMESPACE};
use crate::tags::TagFilter;
use crate::vars::{VariableStore, VarsError};

/// Errors raised by the executor layers
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// A leaf block names no registered module
    #[error("no module found for task \"{0}\"")]
    NoModule(String),

    /// A task reached terminal failure
    #[error("{message}")]
    TaskFailed { task: String, message: String },

    /// A task did not finish within the configured timeout
    #[error("task \"{task}\" timed out after {secs}s")]
    Timeout { task: String, secs: u64 },

    /// The run was cancelled
    #[error("execution cancelled")]
    Cancelled,

    /// A `serial` value that cannot batch hosts
    #[error("invalid serial: {0}")]
    InvalidSerial(String),

    /// Several errors, e.g. from a block and its `always` section
    #[error("{}", join_messages(.0))]
    Multiple(Vec<ExecutorError>),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Vars(#[from] VarsError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

fn join_messages(errors: &[ExecutorError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl ExecutorError {
    /// Combine accumulated errors; `None` when there are none
    pub fn join(errors: Vec<ExecutorError>) -> Option<ExecutorError> {
        let mut flat = Vec::with_capacity(errors.len());
        for err in errors {
            match err {
                ExecutorError::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(ExecutorError::Multiple(flat)),
        }
    }

    /// Whether the error comes only from tasks that failed on their hosts
    pub fn is_task_failure(&self) -> bool {
        match self {
            ExecutorError::TaskFailed { .. } => true,
            ExecutorError::Multiple(errors) => {
                !errors.is_empty() && errors.iter().all(ExecutorError::is_task_failure)
            }
            _ => false,
        }
    }

    /// Whether the error is, or contains, a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            ExecutorError::Cancelled => true,
            ExecutorError::Multiple(errors) => errors.iter().any(ExecutorError::is_cancelled),
            _ => false,
        }
    }

    /// Whether retrying the operation could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            ExecutorError::Store(e) => e.is_conflict(),
            ExecutorError::Timeout { .. } => true,
            ExecutorError::Connection(ConnectionError::Timeout(_)) => true,
            _ => false,
        }
    }

    /// Process exit code: 2 when only tasks failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_task_failure() {
            2
        } else {
            1
        }
    }
}

/// Result type for executor operations
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound for one task's drive loop
    pub task_timeout: Duration,
    /// Retries of a status patch after a version conflict
    pub conflict_retries: u32,
    /// Namespace work orders are created in
    pub namespace: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(60 * 60),
            conflict_retries: 5,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Aggregates collected while a playbook runs
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub counters: TaskCounters,
    pub failed_detail: Vec<FailedDetail>,
}

/// Shared collaborators of one playbook run. Cheap to clone.
#[derive(Clone)]
pub struct ExecutorContext {
    pub store: SharedStore,
    pub vars: VariableStore,
    pub modules: Arc<ModuleRegistry>,
    pub connectors: Arc<dyn ConnectorFactory>,
    pub files: Arc<dyn FileSource>,
    pub tag_filter: TagFilter,
    pub log: ProgressLog,
    pub cancel: CancellationToken,
    pub config: ExecutorConfig,
    /// Key of the owning playbook work order, set when the run starts
    pub playbook: ObjectKey,
    pub state: Arc<Mutex<RunState>>,
}

impl std::fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("playbook", &self.playbook)
            .field("tag_filter", &self.tag_filter)
            .field("config", &self.config)
            .finish()
    }
}

impl ExecutorContext {
    /// Context with built-in modules and connectors, no tag filter and
    /// progress discarded
    pub fn new(store: SharedStore, vars: VariableStore, files: Arc<dyn FileSource>) -> Self {
        Self {
            store,
            vars,
            modules: Arc::new(ModuleRegistry::with_builtins()),
            connectors: Arc::new(DefaultConnectorFactory),
            files,
            tag_filter: TagFilter::new(),
            log: ProgressLog::sink(),
            cancel: CancellationToken::new(),
            config: ExecutorConfig::default(),
            playbook: ObjectKey::default(),
            state: Arc::new(Mutex::new(RunState::default())),
        }
    }

    pub fn with_modules(mut self, modules: ModuleRegistry) -> Self {
        self.modules = Arc::new(modules);
        self
    }

    pub fn with_connectors(mut self, connectors: Arc<dyn ConnectorFactory>) -> Self {
        self.connectors = connectors;
        self
    }

    pub fn with_tag_filter(mut self, filter: TagFilter) -> Self {
        self.tag_filter = filter;
        self
    }

    pub fn with_log(mut self, log: ProgressLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Name of the owning playbook run
    pub fn playbook_name(&self) -> &str {
        &self.playbook.name
    }

    /// Fail fast when the run has been cancelled
    pub fn check_cancelled(&self) -> ExecutorResult<()> {
        if self.cancel.is_cancelled() {
            Err(ExecutorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Snapshot of the counters collected so far
    pub fn counters(&self) -> TaskCounters {
        self.state.lock().counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(task: &str) -> ExecutorError {
        ExecutorError::TaskFailed {
            task: task.to_string(),
            message: format!("task \"{}\" run failed:", task),
        }
    }

    #[test]
    fn test_join_flattens() {
        assert!(ExecutorError::join(vec![]).is_none());
        assert!(matches!(
            ExecutorError::join(vec![ExecutorError::Cancelled]),
            Some(ExecutorError::Cancelled)
        ));
        let nested = ExecutorError::join(vec![
            ExecutorError::Multiple(vec![failed("a"), failed("b")]),
            failed("c"),
        ]);
        match nested {
            Some(ExecutorError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_multiple_display() {
        let err = ExecutorError::Multiple(vec![failed("a"), ExecutorError::Cancelled]);
        assert_eq!(
            err.to_string(),
            "task \"a\" run failed:\nexecution cancelled"
        );
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(failed("a").exit_code(), 2);
        assert_eq!(ExecutorError::Multiple(vec![failed("a"), failed("b")]).exit_code(), 2);
        assert_eq!(
            ExecutorError::Multiple(vec![failed("a"), ExecutorError::NoModule("x".into())]).exit_code(),
            1
        );
        assert_eq!(ExecutorError::Cancelled.exit_code(), 1);
    }

    #[test]
    fn test_recoverable() {
        assert!(ExecutorError::Timeout {
            task: "t".into(),
            secs: 1
        }
        .is_recoverable());
        assert!(!ExecutorError::NoModule("t".into()).is_recoverable());
    }
}
