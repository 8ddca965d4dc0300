//! kubeplay command-line entry point.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use kubeplay::config::{Config, LogFormat};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let mut config = Config::load(cli.config.as_ref())?;
    if cli.no_color {
        config.output.color = false;
    }
    if let Some(format) = cli.log_format {
        config.output.log_format = format;
    }
    if !config.output.color {
        colored::control::set_override(false);
    }

    init_logging(cli.verbosity(), config.output.log_format);

    let ctx = CommandContext::new(&cli, config);
    let result = match &cli.command {
        Commands::Run(args) => args.execute(&ctx).await,
        Commands::Validate(args) => args.execute(&ctx).await,
        Commands::ListHosts(args) => args.execute(&ctx).await,
    };
    let exit_code = match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            err.downcast_ref::<kubeplay::Error>()
                .map_or(1, kubeplay::Error::exit_code)
        }
    };

    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
