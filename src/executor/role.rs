//! Role executor

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

use super::{BlockExecutor, ExecutorContext, ExecutorResult};
use crate::playbook::{Role, When};
use crate::tags::Tags;

/// Runs a role: dependencies first, then its own blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleExecutor;

impl RoleExecutor {
    /// Run `role` on `hosts` with the modifiers inherited from the play.
    ///
    /// Each dependency resolves its modifiers from its own definition on top
    /// of the same inherited values, not from the depending role.
    pub fn exec<'a>(
        ctx: &'a ExecutorContext,
        role: &'a Role,
        hosts: &'a [String],
        ignore_errors: Option<bool>,
        when: &'a When,
        tags: &'a Tags,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        async move {
            let role_tags = role.tags.join(tags);
            if !ctx.tag_filter.is_enabled(&role_tags) {
                debug!(role = %role.name, "role skipped by tag filter");
                return Ok(());
            }
            ctx.check_cancelled()?;
            info!(role = %role.name, "running role");
            ctx.vars.merge_runtime(&role.vars, hosts);

            for dependency in &role.dependencies {
                RoleExecutor::exec(ctx, dependency, hosts, ignore_errors, when, tags).await?;
            }

            let blocks = BlockExecutor {
                hosts: hosts.to_vec(),
                ignore_errors: role.ignore_errors.or(ignore_errors),
                when: role.when.join(when),
                tags: role_tags,
                role: Some(role.name.clone()),
            };
            blocks.exec(ctx, &role.blocks).await
        }
        .boxed()
    }
}
