//! Error types for kubeplay.
//!
//! Every subsystem owns a focused error enum (`VarsError`, `StoreError`,
//! `ConnectionError`, `ModuleError`, `ParseError`, `ExecutorError`). This
//! module ties them together into the crate-level [`Error`] used at API
//! boundaries and by the command-line front end.

use std::path::PathBuf;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::executor::ExecutorError;
use crate::modules::ModuleError;
use crate::playbook::ParseError;
use crate::store::StoreError;
use crate::vars::VarsError;

/// Result type alias for kubeplay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for kubeplay.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// The playbook or one of its role files could not be loaded.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Inventory could not be read.
    #[error("Failed to load inventory from '{path}': {message}")]
    InventoryLoad {
        /// Path to inventory
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// Failure reported by the executor layers.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Variable store or template failure.
    #[error(transparent)]
    Vars(#[from] VarsError),

    /// Work-order store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Module failure outside of a task run.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Transport failure outside of a task run.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parse error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new inventory load error.
    pub fn inventory_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InventoryLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns true if a later attempt may succeed without user action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Store(e) => e.is_conflict(),
            Error::Connection(ConnectionError::Timeout(_)) => true,
            Error::Executor(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Executor(e) => e.exit_code(),
            Error::Connection(_) => 3,
            Error::Parse(_) | Error::YamlParse(_) => 4,
            Error::InventoryLoad { .. } => 5,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err: Error = ExecutorError::TaskFailed {
            task: "install".into(),
            message: "boom".into(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);

        let err = Error::inventory_load("/tmp/inv.yaml", "missing");
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_conflict_is_recoverable() {
        let err: Error = StoreError::Conflict {
            key: "Task/default/t-1".into(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_recoverable());
        assert!(!Error::inventory_load("x", "y").is_recoverable());
    }

    #[test]
    fn test_error_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = res.context("reading playbook").unwrap_err();
        assert_eq!(err.to_string(), "reading playbook");
    }
}
