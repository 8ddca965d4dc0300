//! Debug module - print a message or a variable
//!
//! Runs entirely on the control node. `msg` is already templated by the
//! executor; `var` names an expression evaluated against the host's
//! variables.

use async_trait::async_trait;
use serde_json::Value;

use super::{ExecOptions, Module, ModuleError, ModuleOutput, ModuleResult};
use crate::vars::TemplateEngine;

/// Module for printing debug messages and variable values
pub struct DebugModule;

impl DebugModule {
    /// Format a value for stdout; strings stay as they are
    fn format_value(value: &Value) -> ModuleResult<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => serde_json::to_string(other)
                .map_err(|e| ModuleError::ExecutionFailed(format!("cannot format value: {}", e))),
        }
    }
}

#[async_trait]
impl Module for DebugModule {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        let value = match &opts.args {
            Value::Object(args) => {
                if let Some(msg) = args.get("msg") {
                    msg.clone()
                } else if let Some(Value::String(var)) = args.get("var") {
                    let vars = opts.vars.all_vars(&opts.host);
                    TemplateEngine::global().eval_expr(var, &vars)?
                } else {
                    return Err(ModuleError::MissingParameter("msg".to_string()));
                }
            }
            Value::Null => return Err(ModuleError::MissingParameter("msg".to_string())),
            other => other.clone(),
        };
        Ok(ModuleOutput::stdout(Self::format_value(&value)?))
    }
}
