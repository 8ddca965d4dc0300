//! Assert module - fail the host if conditions do not hold
//!
//! `that` holds one condition or a list of plain expressions, evaluated
//! against the host's variables.

use async_trait::async_trait;

use super::{ExecOptions, Module, ModuleError, ModuleOutput, ModuleResult, ParamExt};
use crate::vars::TemplateEngine;

/// Module for asserting conditions are true
pub struct AssertModule;

#[async_trait]
impl Module for AssertModule {
    fn name(&self) -> &'static str {
        "assert"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        let that = opts
            .args
            .get_vec_string("that")?
            .ok_or_else(|| ModuleError::MissingParameter("that".to_string()))?;
        let vars = opts.vars.all_vars(&opts.host);
        let engine = TemplateEngine::global();

        let mut failed = Vec::new();
        for condition in &that {
            if !engine.eval_conditions(std::slice::from_ref(condition), &vars)? {
                failed.push(condition.clone());
            }
        }

        if failed.is_empty() {
            let msg = opts
                .args
                .get_string("success_msg")?
                .unwrap_or_else(|| "All assertions passed".to_string());
            Ok(ModuleOutput::stdout(msg))
        } else {
            let msg = match opts.args.get_string("fail_msg")? {
                Some(msg) => msg,
                None => format!("Assertion failed: {}", failed.join(", ")),
            };
            Err(ModuleError::AssertionFailed(msg))
        }
    }
}
