//! Block executor
//!
//! Walks a block list in document order. Each block resolves its modifiers
//! against the inherited ones before anything runs:
//!
//! - hosts: the first host only when `run_once` is set,
//! - tags: inherited tags followed by the block's own,
//! - `when`: inherited conditions followed by the block's own,
//! - `ignore_errors`: the block's value, else the inherited one.

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, instrument, warn};

use super::{ExecutorContext, ExecutorError, ExecutorResult, TaskExecutor};
use crate::converter;
use crate::playbook::{Block, BlockKind, When};
use crate::tags::Tags;

/// Inherited context for a list of blocks
#[derive(Debug, Clone, Default)]
pub struct BlockExecutor {
    pub hosts: Vec<String>,
    pub ignore_errors: Option<bool>,
    pub when: When,
    pub tags: Tags,
    pub role: Option<String>,
}

impl BlockExecutor {
    /// Executor for top-level blocks of a play
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            ..Default::default()
        }
    }

    /// Run `blocks` in order, stopping at the first error.
    pub fn exec<'a>(
        &'a self,
        ctx: &'a ExecutorContext,
        blocks: &'a [Block],
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        async move {
            for block in blocks {
                ctx.check_cancelled()?;
                self.exec_block(ctx, block).await?;
            }
            Ok(())
        }
        .boxed()
    }

    #[instrument(skip(self, ctx, block), fields(block = %block.common.name))]
    async fn exec_block(&self, ctx: &ExecutorContext, block: &Block) -> ExecutorResult<()> {
        let hosts = if block.common.run_once {
            self.hosts.iter().take(1).cloned().collect()
        } else {
            self.hosts.clone()
        };
        let tags = block.common.tags.join(&self.tags);
        if !ctx.tag_filter.is_enabled(&tags) {
            debug!(tags = ?tags.as_slice(), "block skipped by tag filter");
            return Ok(());
        }
        let when = block.common.when.join(&self.when);
        let ignore_errors = block.common.ignore_errors.or(self.ignore_errors);

        ctx.vars.merge_runtime(&block.common.vars, &hosts);

        match &block.kind {
            BlockKind::Task(_) => {
                let task = converter::block_to_task(
                    ctx,
                    self.role.as_deref(),
                    &hosts,
                    &when,
                    ignore_errors.unwrap_or(false),
                    block,
                )?;
                TaskExecutor::new(ctx.clone()).exec(task).await?;
                Ok(())
            }
            BlockKind::Composite {
                block: body,
                rescue,
                always,
            } => {
                let child = BlockExecutor {
                    hosts,
                    ignore_errors,
                    when,
                    tags,
                    role: self.role.clone(),
                };
                child.exec_composite(ctx, body, rescue, always).await
            }
            // Included blocks were expanded right after the marker.
            BlockKind::IncludeTasks(_) => Ok(()),
        }
    }

    /// `block`, then `rescue` on task failure, then `always`
    async fn exec_composite(
        &self,
        ctx: &ExecutorContext,
        body: &[Block],
        rescue: &[Block],
        always: &[Block],
    ) -> ExecutorResult<()> {
        let mut errors = Vec::new();

        if let Err(err) = self.exec(ctx, body).await {
            if err.is_cancelled() {
                return Err(err);
            }
            if rescue.is_empty() || !err.is_task_failure() {
                errors.push(err);
            } else {
                warn!(error = %err, "block failed, running rescue");
                if let Err(rescue_err) = self.exec(ctx, rescue).await {
                    if rescue_err.is_cancelled() {
                        return Err(rescue_err);
                    }
                    errors.push(err);
                    errors.push(rescue_err);
                }
            }
        }

        if !always.is_empty() {
            if let Err(err) = self.exec(ctx, always).await {
                errors.push(err);
            }
        }

        match ExecutorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
