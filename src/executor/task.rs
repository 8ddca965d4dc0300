//! Task executor: drives one task work order to a terminal phase.
//!
//! The work order is created in the store, then reconciled: each pass runs
//! the module on every host in parallel and the aggregate phase is patched
//! back. A failed pass is re-run until the task's retries are used up.

use futures::future::join_all;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use super::{ExecutorContext, ExecutorError, ExecutorResult};
use crate::modules::{ExecOptions, ModuleError, ModuleOutput, STDOUT_SKIP};
use crate::output::HostState;
use crate::resources::{
    FailedDetail, FailedHost, LoopItemResult, Task, TaskHostResult, TaskPhase, TaskSpec,
};
use crate::store::{self, ObjectKey};
use crate::vars::{JsonMap, TemplateEngine};

/// Name of the transient loop variable
pub const ITEM_VAR: &str = "item";

/// Error text of a `failed_when` trip
pub const FAILED_WHEN_MESSAGE: &str = "reach failed_when, failed";

const CANCELLED_MESSAGE: &str = "execution cancelled";

/// Runs task work orders
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    ctx: ExecutorContext,
}

impl TaskExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self { ctx }
    }

    /// Create `task` in the store and run it until it is complete.
    ///
    /// Returns the final work order, or [`ExecutorError::TaskFailed`] with
    /// the aggregated failure report when the task failed for good.
    #[instrument(skip(self, task), fields(task = %task.spec.name, hosts = task.spec.hosts.len()))]
    pub async fn exec(&self, task: Task) -> ExecutorResult<Task> {
        self.ctx.check_cancelled()?;
        let mut task = store::create(self.ctx.store.as_ref(), &task).await?;
        debug!(key = %task.key(), "task created");
        self.ctx.log.task_start(task.role(), &task.spec.name);

        let cancel = self.ctx.cancel.child_token();
        let limit = self.ctx.config.task_timeout;
        let driven = tokio::time::timeout(limit, self.drive(&mut task, &cancel)).await;
        if driven.is_err() {
            // Stop host work that is still in flight.
            cancel.cancel();
        }
        for host in &task.spec.hosts {
            self.ctx.vars.remove_runtime(&[ITEM_VAR], host);
        }
        self.record(&task, matches!(driven, Ok(Ok(()))));

        match driven {
            Err(_) => Err(ExecutorError::Timeout {
                task: task.spec.name.clone(),
                secs: limit.as_secs(),
            }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) if task.is_failed() => {
                let message = task.failure_message();
                error!(task = %task.spec.name, "task failed");
                Err(ExecutorError::TaskFailed {
                    task: task.spec.name.clone(),
                    message,
                })
            }
            Ok(Ok(())) => Ok(task),
        }
    }

    /// Reconcile until complete
    async fn drive(&self, task: &mut Task, cancel: &CancellationToken) -> ExecutorResult<()> {
        let retries = self.ctx.config.conflict_retries;
        while !task.is_complete() {
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }

            let mut running = task.clone();
            if running.status.phase == TaskPhase::Failed {
                running.status.restart_count += 1;
                warn!(task = %task.spec.name, restart = running.status.restart_count, "retrying failed task");
            }
            running.status.phase = TaskPhase::Running;
            *task = store::update_status(self.ctx.store.as_ref(), task, &running, retries).await?;

            let results = self.run_pass(task, cancel).await;
            let mut done = task.clone();
            done.status.phase = aggregate_phase(&results, task.spec.ignore_errors);
            done.status.host_results = results;
            debug!(task = %task.spec.name, phase = %done.status.phase, "pass finished");
            *task = store::update_status(self.ctx.store.as_ref(), task, &done, retries).await?;

            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
        }
        Ok(())
    }

    /// One execution pass over every host, in parallel. Results come back in
    /// host order.
    async fn run_pass(&self, task: &Task, cancel: &CancellationToken) -> Vec<TaskHostResult> {
        let spec = Arc::new(task.spec.clone());
        let key = task.key();
        let role = task.role().map(str::to_string);

        let handles: Vec<_> = task
            .spec
            .hosts
            .iter()
            .map(|host| {
                let runner = HostRunner {
                    ctx: self.ctx.clone(),
                    spec: Arc::clone(&spec),
                    key: key.clone(),
                    role: role.clone(),
                    host: host.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(async move { runner.run().await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(&task.spec.hosts)
            .map(|(joined, host)| {
                joined.unwrap_or_else(|e| TaskHostResult {
                    host: host.clone(),
                    error: format!("host execution aborted: {}", e),
                    ..Default::default()
                })
            })
            .collect()
    }

    /// Update the run counters and failure details. A task whose drive loop
    /// was interrupted only counts toward the total.
    fn record(&self, task: &Task, finished: bool) {
        let mut state = self.ctx.state.lock();
        state.counters.total += 1;
        if !finished || !task.is_complete() {
            return;
        }
        match task.status.phase {
            TaskPhase::Success => state.counters.success += 1,
            TaskPhase::Ignored => state.counters.ignored += 1,
            TaskPhase::Failed => {
                state.counters.failed += 1;
                state.failed_detail.push(FailedDetail {
                    task: task.spec.name.clone(),
                    hosts: task
                        .status
                        .host_results
                        .iter()
                        .map(|r| FailedHost {
                            host: r.host.clone(),
                            stdout: r.stdout.clone(),
                            stderr: r.stderr.clone(),
                        })
                        .collect(),
                });
            }
            TaskPhase::Pending | TaskPhase::Running => {}
        }
    }
}

fn aggregate_phase(results: &[TaskHostResult], ignore_errors: bool) -> TaskPhase {
    if !results.iter().any(TaskHostResult::is_failed) {
        TaskPhase::Success
    } else if ignore_errors {
        TaskPhase::Ignored
    } else {
        TaskPhase::Failed
    }
}

fn join_error(current: &mut String, next: &str) {
    if next.is_empty() {
        return;
    }
    if !current.is_empty() {
        current.push_str("; ");
    }
    current.push_str(next);
}

/// Registered value of an outcome; JSON output is stored parsed
fn register_entry(item: Option<&JsonValue>, stdout: &str, stderr: &str, error: &str) -> JsonValue {
    let parse = |s: &str| serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.to_string()));
    let mut entry = json!({
        "stdout": parse(stdout),
        "stderr": parse(stderr),
        "error": error,
    });
    if let (Some(item), Some(map)) = (item, entry.as_object_mut()) {
        map.insert("item".to_string(), item.clone());
    }
    entry
}

/// Work of one task on one host
struct HostRunner {
    ctx: ExecutorContext,
    spec: Arc<TaskSpec>,
    key: ObjectKey,
    role: Option<String>,
    host: String,
    cancel: CancellationToken,
}

impl HostRunner {
    async fn run(&self) -> TaskHostResult {
        let engine = TemplateEngine::global();
        let mut result = TaskHostResult {
            host: self.host.clone(),
            ..Default::default()
        };

        let vars = self.ctx.vars.all_vars(&self.host);
        let items = match engine.expand_loop(self.spec.loop_spec.as_ref(), &vars) {
            Ok(items) => items,
            Err(e) => {
                result.error = format!("parse loop error: {}", e);
                self.report(&result);
                return result;
            }
        };

        for item in &items {
            if self.cancel.is_cancelled() {
                join_error(&mut result.error, CANCELLED_MESSAGE);
                break;
            }
            let outcome = self.run_item(item).await;
            join_error(&mut result.error, &outcome.error);
            result.stdout = outcome.stdout.clone();
            result.stderr = outcome.stderr.clone();
            result.items.push(outcome);
        }

        if let Some(name) = &self.spec.register {
            let value = if items.len() == 1 && items[0].is_null() {
                register_entry(None, &result.stdout, &result.stderr, &result.error)
            } else {
                JsonValue::Array(
                    result
                        .items
                        .iter()
                        .map(|i| register_entry(Some(&i.item), &i.stdout, &i.stderr, &i.error))
                        .collect(),
                )
            };
            let mut registered = JsonMap::new();
            registered.insert(name.clone(), value);
            self.ctx.vars.merge_runtime(&registered, &[self.host.clone()]);
        }

        self.report(&result);
        result
    }

    /// One loop iteration: `when`, module, `failed_when`
    async fn run_item(&self, item: &JsonValue) -> LoopItemResult {
        let engine = TemplateEngine::global();
        let looping = self.spec.loop_spec.is_some();
        let mut outcome = LoopItemResult {
            item: item.clone(),
            ..Default::default()
        };

        if looping {
            let mut transient = JsonMap::new();
            transient.insert(ITEM_VAR.to_string(), item.clone());
            self.ctx.vars.merge_runtime(&transient, &[self.host.clone()]);
        }
        let vars = self.ctx.vars.all_vars(&self.host);

        match engine.eval_conditions(&self.spec.when, &vars) {
            Err(e) => outcome.error = format!("parse when condition error: {}", e),
            Ok(false) => outcome.stdout = STDOUT_SKIP.to_string(),
            Ok(true) => {
                match self.execute_module(&vars).await {
                    Ok(out) => {
                        outcome.stdout = out.stdout;
                        outcome.stderr = out.stderr;
                    }
                    Err(e) => {
                        let out = e.output();
                        outcome.stdout = out.stdout;
                        outcome.stderr = out.stderr;
                        outcome.error = e.to_string();
                    }
                }
                self.check_failed_when(vars, &mut outcome);
            }
        }

        if looping {
            self.ctx.vars.remove_runtime(&[ITEM_VAR], &self.host);
        }
        outcome
    }

    fn check_failed_when(&self, mut vars: JsonMap, outcome: &mut LoopItemResult) {
        if self.spec.failed_when.is_empty() {
            return;
        }
        if let Some(name) = &self.spec.register {
            vars.insert(
                name.clone(),
                register_entry(None, &outcome.stdout, &outcome.stderr, &outcome.error),
            );
        }
        match TemplateEngine::global().eval_conditions(&self.spec.failed_when, &vars) {
            Ok(true) => join_error(&mut outcome.error, FAILED_WHEN_MESSAGE),
            Ok(false) => {}
            Err(e) => join_error(
                &mut outcome.error,
                &format!("parse failed_when condition error: {}", e),
            ),
        }
    }

    async fn execute_module(&self, vars: &JsonMap) -> Result<ModuleOutput, ModuleError> {
        let module = self
            .ctx
            .modules
            .find_module(&self.spec.module.name)
            .ok_or_else(|| ModuleError::NotFound(self.spec.module.name.clone()))?;
        let args = TemplateEngine::global().render_value(&self.spec.module.args, vars)?;
        let opts = ExecOptions {
            args,
            host: self.host.clone(),
            vars: self.ctx.vars.clone(),
            task_name: self.spec.name.clone(),
            task_key: self.key.clone(),
            role: self.role.clone(),
            playbook: self.ctx.playbook_name().to_string(),
            connectors: Arc::clone(&self.ctx.connectors),
            files: Arc::clone(&self.ctx.files),
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ModuleError::ExecutionFailed(CANCELLED_MESSAGE.to_string())),
            result = module.execute(opts) => result,
        }
    }

    fn report(&self, result: &TaskHostResult) {
        let state = if result.is_failed() {
            if self.spec.ignore_errors {
                HostState::Ignore
            } else {
                error!(host = %self.host, task = %self.spec.name, stdout = %result.stdout, error = %result.error, "task run failed");
                HostState::Failed
            }
        } else if result.stdout == STDOUT_SKIP {
            HostState::Skip
        } else {
            HostState::Success
        };
        self.ctx
            .log
            .host_result(&self.host, self.ctx.vars.host_max_len(), state);
    }
}
