//! Playbook executor
//!
//! Persists the playbook run, then runs each play batch by batch in the
//! order pre_tasks, roles, tasks, post_tasks. The first unrecovered error
//! stops the run; the run's final status records it together with the task
//! counters.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{
    BlockExecutor, ExecutorContext, ExecutorError, ExecutorResult, RoleExecutor, RunState,
    TaskExecutor,
};
use crate::converter::{self, group_hosts_by_serial};
use crate::playbook::{Block, Play, Playbook, When};
use crate::resources::{
    PlaybookPhase, PlaybookRun, PlaybookSpec, REASON_EXECUTOR_ERROR, REASON_TASK_FAILED,
};
use crate::store::{self, ObjectMeta};

/// Outcome of a playbook run
#[derive(Debug)]
pub struct PlaybookReport {
    /// The run as last persisted
    pub run: PlaybookRun,
    /// Error that stopped the run, if any
    pub error: Option<ExecutorError>,
}

impl PlaybookReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, ExecutorError::exit_code)
    }
}

/// Runs whole playbooks
#[derive(Debug, Clone)]
pub struct PlaybookExecutor {
    ctx: ExecutorContext,
    inventory: Option<String>,
}

impl PlaybookExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            inventory: None,
        }
    }

    /// Record the inventory source on the run
    pub fn with_inventory(mut self, inventory: impl Into<String>) -> Self {
        self.inventory = Some(inventory.into());
        self
    }

    /// Run every play of `playbook`.
    ///
    /// Failures of the run itself are reported in [`PlaybookReport::error`];
    /// the outer error is reserved for failing to persist the run.
    #[instrument(skip(self, playbook), fields(playbook = %playbook.name))]
    pub async fn exec(&self, playbook: &Playbook) -> ExecutorResult<PlaybookReport> {
        let name = if playbook.name.is_empty() {
            "playbook"
        } else {
            playbook.name.as_str()
        };
        let retries = self.ctx.config.conflict_retries;
        let run = PlaybookRun {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", name)),
                namespace: self.ctx.config.namespace.clone(),
                ..Default::default()
            },
            spec: PlaybookSpec {
                playbook: name.to_string(),
                tags: self.ctx.tag_filter.tags().to_vec(),
                skip_tags: self.ctx.tag_filter.skip_tags().to_vec(),
                inventory: self.inventory.clone(),
            },
            status: Default::default(),
        };
        let run = store::create(self.ctx.store.as_ref(), &run).await?;

        let mut ctx = self.ctx.clone();
        ctx.playbook = run.key();
        ctx.state = Arc::new(Mutex::new(RunState::default()));

        let run_name = run.metadata.name.clone();
        ctx.log.playbook_start(&run_name);
        info!(run = %run_name, plays = playbook.plays.len(), "playbook started");

        let mut running = run.clone();
        running.status.phase = PlaybookPhase::Running;
        let run = store::update_status(ctx.store.as_ref(), &run, &running, retries).await?;

        let result = self.exec_plays(&ctx, playbook).await;

        let state = ctx.state.lock().clone();
        let mut done = run.clone();
        done.status.task_result = state.counters;
        done.status.failed_detail = state.failed_detail;
        match &result {
            Ok(()) => done.status.phase = PlaybookPhase::Succeeded,
            Err(e) => {
                error!(run = %run_name, error = %e, "playbook failed");
                done.status.phase = PlaybookPhase::Failed;
                let reason = if e.exit_code() == 2 {
                    REASON_TASK_FAILED
                } else {
                    REASON_EXECUTOR_ERROR
                };
                done.status.failure_reason = Some(reason.to_string());
                done.status.failure_message = Some(e.to_string());
            }
        }
        ctx.log.playbook_finish(&run_name, &state.counters);

        let run = match store::update_status(ctx.store.as_ref(), &run, &done, retries).await {
            Ok(run) => run,
            Err(e) => {
                error!(run = %run_name, error = %e, "failed to persist playbook status");
                done
            }
        };

        Ok(PlaybookReport {
            run,
            error: result.err(),
        })
    }

    async fn exec_plays(&self, ctx: &ExecutorContext, playbook: &Playbook) -> ExecutorResult<()> {
        for play in &playbook.plays {
            ctx.check_cancelled()?;
            let play_name = if play.name.is_empty() {
                play.hosts.join(",")
            } else {
                play.name.clone()
            };
            if !ctx.tag_filter.is_enabled(&play.tags) {
                info!(play = %play_name, "play skipped by tag filter");
                continue;
            }

            let hosts = ctx.vars.resolve_hosts(&play.hosts)?;
            if hosts.is_empty() {
                warn!(play = %play_name, "no hosts matched, skipping play");
                ctx.log.message(&format!("[Play {}] skipped: no hosts matched", play_name));
                continue;
            }

            if play.gather_facts {
                gather_facts(ctx, &hosts).await?;
            }

            let batches = if play.run_once {
                vec![vec![hosts[0].clone()]]
            } else {
                group_hosts_by_serial(&hosts, &play.serial)?
            };
            for batch in &batches {
                info!(play = %play_name, hosts = ?batch, "running batch");
                exec_batch(ctx, play, batch).await?;
            }
        }
        Ok(())
    }
}

/// Run the `setup` module on every host
async fn gather_facts(ctx: &ExecutorContext, hosts: &[String]) -> ExecutorResult<()> {
    let block = Block::task("gather_facts", "setup", serde_json::Value::Null);
    let task = converter::block_to_task(ctx, None, hosts, &When::new(), false, &block)?;
    TaskExecutor::new(ctx.clone()).exec(task).await?;
    Ok(())
}

async fn exec_batch(ctx: &ExecutorContext, play: &Play, hosts: &[String]) -> ExecutorResult<()> {
    ctx.vars.merge_runtime(&play.vars, hosts);
    let blocks = BlockExecutor {
        hosts: hosts.to_vec(),
        ignore_errors: play.ignore_errors,
        when: play.when.clone(),
        tags: play.tags.clone(),
        role: None,
    };

    blocks.exec(ctx, &play.pre_tasks).await?;
    for role in &play.roles {
        RoleExecutor::exec(ctx, role, hosts, play.ignore_errors, &play.when, &play.tags).await?;
    }
    blocks.exec(ctx, &play.tasks).await?;
    blocks.exec(ctx, &play.post_tasks).await
}
