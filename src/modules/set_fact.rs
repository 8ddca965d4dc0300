//! Set fact module - store variables for the current host
//!
//! The arguments map is merged into the host's runtime variables, so later
//! tasks on the same host can use the values.

use async_trait::async_trait;
use serde_json::Value;

use super::{ExecOptions, Module, ModuleError, ModuleOutput, ModuleResult};

/// Module for setting runtime variables
pub struct SetFactModule;

#[async_trait]
impl Module for SetFactModule {
    fn name(&self) -> &'static str {
        "set_fact"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        let facts = match &opts.args {
            Value::Object(map) => map,
            _ => {
                return Err(ModuleError::InvalidParameter(
                    "set_fact expects a map of variables".to_string(),
                ))
            }
        };
        opts.vars.merge_runtime(facts, &[opts.host.clone()]);
        Ok(ModuleOutput::success())
    }
}
