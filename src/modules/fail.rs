//! Fail module

use async_trait::async_trait;
use serde_json::Value;

use super::{ExecOptions, Module, ModuleError, ModuleOutput, ModuleResult, ParamExt};

/// Module that always fails the host with `msg`
pub struct FailModule;

#[async_trait]
impl Module for FailModule {
    fn name(&self) -> &'static str {
        "fail"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        let msg = match &opts.args {
            Value::String(s) => Some(s.clone()),
            args => args.get_string("msg")?,
        };
        Err(ModuleError::Failed(
            msg.unwrap_or_else(|| "Failed as requested from task".to_string()),
        ))
    }
}
