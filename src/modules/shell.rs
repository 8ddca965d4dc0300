//! Shell module
//!
//! Every connector already runs commands through a shell, so `shell` accepts
//! the same arguments as `command`, plus an optional `chdir`.

use async_trait::async_trait;

use super::command::{command_text, run_command};
use super::{ExecOptions, Module, ModuleOutput, ModuleResult, ParamExt};

/// Module for running shell snippets
pub struct ShellModule;

#[async_trait]
impl Module for ShellModule {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        let mut cmd = command_text(&opts.args)?;
        if let Some(dir) = opts.args.get_string("chdir")? {
            cmd = format!("cd '{}' && {}", dir.replace('\'', r"'\''"), cmd);
        }
        run_command(&opts, &cmd).await
    }
}
