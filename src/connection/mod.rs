//! Connection layer for host communication.
//!
//! Modules never talk to a host directly. They ask the [`ConnectorFactory`]
//! for a [`Connector`] built from the host's variables and use its narrow
//! interface: run a command, put a file, fetch a file and, when the transport
//! supports it, report host facts through [`GatherFacts`].
//!
//! The transport is chosen by the host's `connector.type` variable:
//!
//! ```yaml
//! hosts:
//!   node1:
//!     connector:
//!       type: local
//! ```
//!
//! `localhost` always uses the local transport.

pub mod local;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

use crate::inventory::LOCALHOST;
use crate::vars::JsonMap;

pub use local::LocalConnector;

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The command could not be started or awaited.
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// The command ran and exited non-zero.
    #[error("command exited with code {exit_code}: {stderr}")]
    CommandFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// File upload or download failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Host connector settings are invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested transport is not available.
    #[error("Unsupported connector: {0}")]
    Unsupported(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Output of a successful command.
///
/// ```rust
/// use kubeplay::connection::CommandOutput;
///
/// let out = CommandOutput::success("Hello\n", "");
/// assert_eq!(out.exit_code, 0);
/// assert_eq!(out.stdout_trimmed(), "Hello");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Output of a command that exited zero
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: 0,
        }
    }

    /// Stdout without surrounding whitespace
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Transport to one host.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Host this connector talks to
    fn host(&self) -> &str;

    /// Open the transport
    async fn init(&self) -> ConnectionResult<()>;

    /// Release the transport
    async fn close(&self) -> ConnectionResult<()>;

    /// Run a shell command. A non-zero exit is [`ConnectionError::CommandFailed`].
    async fn execute_command(&self, cmd: &str) -> ConnectionResult<CommandOutput>;

    /// Write `content` to `dst` with permission bits `mode`
    async fn put_file(&self, content: &[u8], dst: &str, mode: u32) -> ConnectionResult<()>;

    /// Read the file at `src`
    async fn fetch_file(&self, src: &str) -> ConnectionResult<Vec<u8>>;

    /// Native fact gathering, when the transport offers it
    fn gather_facts(&self) -> Option<&dyn GatherFacts> {
        None
    }
}

/// Transports that can report host facts themselves.
#[async_trait]
pub trait GatherFacts: Send + Sync {
    /// Facts about the host
    async fn host_info(&self) -> ConnectionResult<JsonMap>;
}

/// Builds connectors from host variables.
pub trait ConnectorFactory: Send + Sync + std::fmt::Debug {
    /// Connector for `host`, configured from its variables
    fn connector(&self, host: &str, vars: &JsonMap) -> ConnectionResult<Arc<dyn Connector>>;
}

/// Connector type requested by a host's variables
pub fn connector_type<'a>(host: &str, vars: &'a JsonMap) -> &'a str {
    match vars.get("connector").and_then(|c| c.get("type")).and_then(JsonValue::as_str) {
        Some(kind) => kind,
        None if host == LOCALHOST => "local",
        None => "ssh",
    }
}

/// Factory for the transports built into kubeplay.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnectorFactory;

impl ConnectorFactory for DefaultConnectorFactory {
    fn connector(&self, host: &str, vars: &JsonMap) -> ConnectionResult<Arc<dyn Connector>> {
        match connector_type(host, vars) {
            "local" | "localhost" => Ok(Arc::new(LocalConnector::new(host))),
            other => Err(ConnectionError::Unsupported(format!(
                "host '{}' requests connector '{}'; only 'local' is built in",
                host, other
            ))),
        }
    }
}
