//! Run command - Execute a playbook

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::CommandContext;
use kubeplay::executor::{ExecutorContext, PlaybookExecutor};
use kubeplay::output::ProgressLog;
use kubeplay::store::MemoryStore;
use kubeplay::tags::TagFilter;

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the playbook file
    #[arg(required = true)]
    pub playbook: PathBuf,

    /// Tags to run (only blocks with these tags)
    #[arg(long, short = 't', value_delimiter = ',', action = clap::ArgAction::Append)]
    pub tags: Vec<String>,

    /// Tags to skip
    #[arg(long, value_delimiter = ',', action = clap::ArgAction::Append)]
    pub skip_tags: Vec<String>,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let project = Arc::new(ctx.load_project(&self.playbook)?);
        let vars = ctx.variable_store()?;

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                on_signal.cancel();
            }
        });

        let filter = TagFilter::new()
            .with_tags(self.tags.clone())
            .with_skip_tags(self.skip_tags.clone());
        let engine = ExecutorContext::new(Arc::new(MemoryStore::new()), vars, project.clone())
            .with_tag_filter(filter)
            .with_log(ProgressLog::stdout(ctx.config.output.color))
            .with_cancel(cancel)
            .with_config(ctx.config.executor_config());

        let mut executor = PlaybookExecutor::new(engine);
        if let Some(inventory) = &ctx.inventory_path {
            executor = executor.with_inventory(inventory.display().to_string());
        }

        let report = executor.exec(project.playbook()).await?;
        info!(
            run = %report.run.metadata.name,
            phase = %report.run.status.phase,
            "playbook run finished"
        );
        if let Some(err) = &report.error {
            eprintln!("{}", err);
        }
        Ok(report.exit_code())
    }
}
