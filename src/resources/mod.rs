//! Work-order resources tracked in the object store.

pub mod playbook;
pub mod task;

pub use playbook::{
    FailedDetail, FailedHost, PlaybookPhase, PlaybookRun, PlaybookSpec, PlaybookStatus,
    TaskCounters, REASON_EXECUTOR_ERROR, REASON_TASK_FAILED,
};
pub use task::{
    LoopItemResult, ModuleRef, Task, TaskHostResult, TaskPhase, TaskSpec, TaskStatus,
    ROLE_ANNOTATION,
};
