//! Setup module - gather host facts
//!
//! Facts are stored as the host's remote variables. They are written only
//! once per run; later gathers on the same host leave them untouched.

use async_trait::async_trait;
use tracing::debug;

use super::{ExecOptions, Module, ModuleOutput, ModuleResult};
use crate::facts;

/// Module gathering facts for `gather_facts`
pub struct SetupModule;

#[async_trait]
impl Module for SetupModule {
    fn name(&self) -> &'static str {
        "setup"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        if opts.vars.has_remote(&opts.host) {
            debug!(host = %opts.host, "facts already gathered");
            return Ok(ModuleOutput::success());
        }
        let conn = opts.connector().await?;
        let gathered = facts::gather(conn.as_ref()).await;
        conn.close().await?;
        opts.vars.merge_remote(gathered?, &opts.host);
        Ok(ModuleOutput::success())
    }
}
