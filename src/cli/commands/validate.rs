//! Validate command - check a playbook without running it

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use super::CommandContext;
use kubeplay::converter::module_name;
use kubeplay::modules::ModuleRegistry;
use kubeplay::playbook::Playbook;

/// Arguments for validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// Playbook file to validate
    pub playbook: PathBuf,
}

impl ValidateArgs {
    /// Execute the validate command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let project = ctx.load_project(&self.playbook)?;
        let registry = ModuleRegistry::with_builtins();
        let problems = unresolved_tasks(&registry, project.playbook());

        if problems.is_empty() {
            let ok = "ok".green();
            println!("{}: {}", self.playbook.display(), ok);
            return Ok(0);
        }
        for name in &problems {
            eprintln!("{} no module found for task \"{}\"", "error:".red(), name);
        }
        Ok(1)
    }
}

/// Names of the leaf tasks that name no registered module
pub fn unresolved_tasks(registry: &ModuleRegistry, playbook: &Playbook) -> Vec<String> {
    playbook
        .task_blocks()
        .into_iter()
        .filter(|block| module_name(registry, block).is_none())
        .map(|block| block.common.name.clone())
        .collect()
}
