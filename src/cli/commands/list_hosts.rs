//! List-hosts command - show which hosts each play targets

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use super::CommandContext;

/// Arguments for the list-hosts command
#[derive(Parser, Debug, Clone)]
pub struct ListHostsArgs {
    /// Playbook whose plays are resolved
    pub playbook: PathBuf,
}

impl ListHostsArgs {
    /// Execute the list-hosts command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let project = ctx.load_project(&self.playbook)?;
        let vars = ctx.variable_store()?;

        for (index, play) in project.playbook().plays.iter().enumerate() {
            let name = if play.name.is_empty() {
                format!("#{}", index + 1)
            } else {
                play.name.clone()
            };
            let hosts = vars.resolve_hosts(&play.hosts)?;
            println!("play {} ({}): {} host(s)", name, play.hosts.join(","), hosts.len());
            for host in hosts {
                println!("    {}", host);
            }
        }
        Ok(0)
    }
}
