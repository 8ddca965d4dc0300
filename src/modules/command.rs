//! Command module - run a command on the target host
//!
//! The command is passed to the host's connector as is. Arguments are either
//! the command string itself or a map with `cmd`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ExecOptions, Module, ModuleError, ModuleOutput, ModuleResult, ParamExt};

/// Module for executing commands
pub struct CommandModule;

/// Command text from the module arguments
pub(crate) fn command_text(args: &Value) -> ModuleResult<String> {
    let cmd = match args {
        Value::String(s) => s.clone(),
        Value::Object(_) => args.get_string_required("cmd")?,
        _ => {
            return Err(ModuleError::InvalidParameter(
                "expected a command string or a map with 'cmd'".to_string(),
            ))
        }
    };
    if cmd.trim().is_empty() {
        return Err(ModuleError::InvalidParameter("cmd cannot be empty".to_string()));
    }
    Ok(cmd)
}

/// Run `cmd` through the host's connector
pub(crate) async fn run_command(opts: &ExecOptions, cmd: &str) -> ModuleResult<ModuleOutput> {
    debug!(host = %opts.host, command = %cmd, "running command");
    let conn = opts.connector().await?;
    let result = conn.execute_command(cmd).await;
    conn.close().await?;
    let output = result?;
    Ok(ModuleOutput {
        stdout: output.stdout.trim_end().to_string(),
        stderr: output.stderr.trim_end().to_string(),
    })
}

#[async_trait]
impl Module for CommandModule {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        let cmd = command_text(&opts.args)?;
        run_command(&opts, &cmd).await
    }
}
