//! CLI module for kubeplay
//!
//! Argument parsing and subcommand dispatch.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kubeplay::config::LogFormat;

/// kubeplay - run playbooks against an inventory
#[derive(Parser, Debug, Clone)]
#[command(name = "kubeplay")]
#[command(version)]
#[command(about = "Run playbooks of plays, roles, blocks and tasks against an inventory", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to inventory file
    #[arg(short = 'i', long, global = true, env = "KUBEPLAY_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Extra variables (key=value or @file.yml)
    #[arg(short = 'e', long = "extra-vars", global = true, action = clap::ArgAction::Append)]
    pub extra_vars: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "KUBEPLAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Diagnostic log format (text or json)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a playbook
    Run(commands::run::RunArgs),

    /// Check that every task of a playbook resolves to a module
    Validate(commands::validate::ValidateArgs),

    /// Print the hosts each play would run on
    #[command(name = "list-hosts")]
    ListHosts(commands::list_hosts::ListHostsArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}
