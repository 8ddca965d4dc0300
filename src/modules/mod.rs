//! Module system for kubeplay
//!
//! Modules are the leaves of a playbook: each task names exactly one module,
//! and the task executor invokes it once per host and loop item. A module
//! receives arguments that are already templated against the host's
//! variables and reports raw text outcomes; interpreting them (`failed_when`,
//! `register`, phases) is the executor's job.

pub mod assert;
pub mod command;
pub mod copy;
pub mod debug;
pub mod fail;
pub mod fetch;
pub mod set_fact;
pub mod setup;
pub mod shell;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::connection::{ConnectionError, Connector, ConnectorFactory};
use crate::project::FileSource;
use crate::store::ObjectKey;
use crate::vars::{VariableStore, VarsError};

/// Stdout recorded when an iteration was skipped by `when`
pub const STDOUT_SKIP: &str = "skip";
/// Stdout of modules that have nothing else to report
pub const STDOUT_SUCCESS: &str = "success";

/// Errors that can occur during module execution
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// A command ran and exited non-zero; its output is kept
    #[error("Command failed with exit code {code}: {stderr}")]
    CommandFailed {
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// `assert` conditions did not hold
    #[error("{0}")]
    AssertionFailed(String),

    /// Raised on purpose by `fail`
    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Vars(#[from] VarsError),

    #[error(transparent)]
    Connection(ConnectionError),
}

impl From<ConnectionError> for ModuleError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::CommandFailed {
                exit_code,
                stdout,
                stderr,
            } => ModuleError::CommandFailed {
                code: exit_code,
                stdout,
                stderr,
            },
            other => ModuleError::Connection(other),
        }
    }
}

impl ModuleError {
    /// Output produced before the failure, if the module got that far
    pub fn output(&self) -> ModuleOutput {
        match self {
            ModuleError::CommandFailed { stdout, stderr, .. } => ModuleOutput {
                stdout: stdout.trim_end().to_string(),
                stderr: stderr.trim_end().to_string(),
            },
            _ => ModuleOutput::default(),
        }
    }
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Text outcome of a module run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ModuleOutput {
    /// Output with only stdout set
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// The generic success marker
    pub fn success() -> Self {
        Self::stdout(STDOUT_SUCCESS)
    }
}

/// Everything a module needs to run on one host.
#[derive(Clone)]
pub struct ExecOptions {
    /// Module arguments, already templated for this host
    pub args: JsonValue,
    /// Target host
    pub host: String,
    /// Variable store of the run
    pub vars: VariableStore,
    /// Name of the owning task
    pub task_name: String,
    /// Store key of the owning task
    pub task_key: ObjectKey,
    /// Role the task came from
    pub role: Option<String>,
    /// Name of the owning playbook run
    pub playbook: String,
    /// Builds connectors for hosts
    pub connectors: Arc<dyn ConnectorFactory>,
    /// Reads files shipped with the project
    pub files: Arc<dyn FileSource>,
}

impl fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOptions")
            .field("args", &self.args)
            .field("host", &self.host)
            .field("task", &self.task_key)
            .field("role", &self.role)
            .finish()
    }
}

impl ExecOptions {
    /// An initialized connector for the target host
    pub async fn connector(&self) -> ModuleResult<Arc<dyn Connector>> {
        let vars = self.vars.all_vars(&self.host);
        let conn = self.connectors.connector(&self.host, &vars)?;
        conn.init().await?;
        Ok(conn)
    }
}

/// Trait that all modules must implement
#[async_trait]
pub trait Module: Send + Sync {
    /// Returns the name of the module
    fn name(&self) -> &'static str;

    /// Execute the module on one host
    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput>;
}

/// Helper trait for extracting parameters from module arguments
pub trait ParamExt {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> ModuleResult<String>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_mode(&self, key: &str) -> ModuleResult<Option<u32>>;
    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
}

impl ParamExt for JsonValue {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>> {
        match self.get(key) {
            Some(JsonValue::String(s)) => Ok(Some(s.clone())),
            Some(JsonValue::Null) | None => Ok(None),
            Some(v) => Ok(Some(v.to_string())),
        }
    }

    fn get_string_required(&self, key: &str) -> ModuleResult<String> {
        self.get_string(key)?
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => crate::playbook::parse_flexible_bool(v)
                .ok()
                .flatten()
                .unwrap_or(default),
            None => default,
        }
    }

    /// File mode; strings are read as octal (`"0644"`), numbers as given
    fn get_mode(&self, key: &str) -> ModuleResult<Option<u32>> {
        match self.get(key) {
            Some(JsonValue::Number(n)) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| ModuleError::InvalidParameter(format!("{} must be a file mode", key))),
            Some(JsonValue::String(s)) => u32::from_str_radix(s.trim_start_matches("0o"), 8)
                .map(Some)
                .map_err(|_| ModuleError::InvalidParameter(format!("{} must be an octal file mode", key))),
            Some(JsonValue::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!("{} must be a file mode", key))),
        }
    }

    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(JsonValue::Array(arr)) => Ok(Some(
                arr.iter()
                    .map(|item| match item {
                        JsonValue::String(s) => s.clone(),
                        v => v.to_string(),
                    })
                    .collect(),
            )),
            Some(JsonValue::String(s)) => Ok(Some(vec![s.clone()])),
            Some(JsonValue::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a string or a list",
                key
            ))),
        }
    }
}

/// Registry for looking up modules by name
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort_unstable();
        f.debug_struct("ModuleRegistry").field("modules", &names).finish()
    }
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Logic modules, evaluated on the control node
        registry.register(Arc::new(assert::AssertModule));
        registry.register(Arc::new(debug::DebugModule));
        registry.register(Arc::new(fail::FailModule));
        registry.register(Arc::new(set_fact::SetFactModule));

        // Host modules, going through a connector
        registry.register(Arc::new(command::CommandModule));
        registry.register(Arc::new(shell::ShellModule));
        registry.register(Arc::new(copy::CopyModule));
        registry.register(Arc::new(fetch::FetchModule));
        registry.register(Arc::new(setup::SetupModule));
        registry
    }

    /// Register a module, replacing any module of the same name
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn find_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Check if a module exists
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Get all module names
    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(|s| s.as_str()).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_registered() {
        let registry = ModuleRegistry::with_builtins();
        for name in [
            "assert", "command", "copy", "debug", "fail", "fetch", "set_fact", "setup", "shell",
        ] {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert!(registry.find_module("apt").is_none());
    }

    #[test]
    fn test_param_ext() {
        let args = json!({"dest": "/tmp/x", "mode": "0644", "n": 5, "flag": "yes", "list": ["a", 1]});
        assert_eq!(args.get_string_required("dest").unwrap(), "/tmp/x");
        assert_eq!(args.get_string("n").unwrap().as_deref(), Some("5"));
        assert!(matches!(
            args.get_string_required("src"),
            Err(ModuleError::MissingParameter(_))
        ));
        assert_eq!(args.get_mode("mode").unwrap(), Some(0o644));
        assert_eq!(json!({"mode": 420}).get_mode("mode").unwrap(), Some(0o644));
        assert!(args.get_bool_or("flag", false));
        assert_eq!(
            args.get_vec_string("list").unwrap(),
            Some(vec!["a".to_string(), "1".to_string()])
        );
    }

    #[test]
    fn test_command_failure_keeps_output() {
        let err: ModuleError = ConnectionError::CommandFailed {
            exit_code: 1,
            stdout: "out\n".into(),
            stderr: "err\n".into(),
        }
        .into();
        assert_eq!(err.output().stdout, "out");
        assert_eq!(err.output().stderr, "err");
    }
}
