//! Subcommands module for kubeplay CLI

pub mod list_hosts;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use kubeplay::config::Config;
use kubeplay::inventory::Inventory;
use kubeplay::project::Project;
use kubeplay::vars::{yaml_to_vars, JsonMap, VariableStore};

/// Common context shared between commands
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Inventory path
    pub inventory_path: Option<PathBuf>,
    /// Extra variables
    pub extra_vars: Vec<String>,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        Self {
            config,
            inventory_path: cli.inventory.clone(),
            extra_vars: cli.extra_vars.clone(),
            verbosity: cli.verbosity(),
        }
    }

    /// Resolve a user supplied path against the configured work dir
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.config.defaults.work_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Load the playbook project at `path`
    pub fn load_project(&self, path: &Path) -> Result<Project> {
        let path = self.resolve(path);
        Project::load(&path)
            .map_err(kubeplay::Error::from)
            .with_context(|| format!("Failed to load playbook: {}", path.display()))
    }

    /// Load the inventory, or an empty one when none was given
    pub fn load_inventory(&self) -> Result<Inventory> {
        match &self.inventory_path {
            Some(path) => {
                let path = self.resolve(path);
                Inventory::load(&path)
                    .map_err(|e| kubeplay::Error::inventory_load(&path, e.to_string()))
                    .map_err(anyhow::Error::from)
            }
            None => {
                tracing::info!("no inventory specified, using localhost");
                Ok(Inventory::new())
            }
        }
    }

    /// Parse `key=value` and `@file.yml` extra variables; later ones win
    pub fn parse_extra_vars(&self) -> Result<JsonMap> {
        let mut vars = JsonMap::new();

        for var in &self.extra_vars {
            if let Some(file_path) = var.strip_prefix('@') {
                let path = self.resolve(Path::new(file_path));
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read vars file: {}", path.display()))?;
                let value: serde_yaml::Value = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse vars file: {}", path.display()))?;
                vars.extend(yaml_to_vars(&value)?);
            } else if let Some((key, value)) = var.split_once('=') {
                let parsed = serde_yaml::from_str::<serde_json::Value>(value)
                    .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
                vars.insert(key.to_string(), parsed);
            } else {
                anyhow::bail!("invalid extra var '{}', expected key=value or @file", var);
            }
        }

        Ok(vars)
    }

    /// Variable store seeded from the inventory and extra vars
    pub fn variable_store(&self) -> Result<VariableStore> {
        Ok(VariableStore::new(
            self.load_inventory()?,
            self.parse_extra_vars()?,
        ))
    }
}
