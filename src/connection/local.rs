//! Local connector
//!
//! Runs commands and file operations on the control node itself, without
//! any network transport.

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandOutput, ConnectionError, ConnectionResult, Connector, GatherFacts};
use crate::facts;
use crate::vars::JsonMap;

/// Connector for the current machine
#[derive(Debug, Clone)]
pub struct LocalConnector {
    /// Inventory name of the host this connector serves
    host: String,
}

impl LocalConnector {
    /// Create a local connector answering for `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    fn build_command(&self, command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn host(&self) -> &str {
        &self.host
    }

    async fn init(&self) -> ConnectionResult<()> {
        Ok(())
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> ConnectionResult<CommandOutput> {
        debug!(host = %self.host, command = %command, "Executing local command");

        let output = self
            .build_command(command)
            .output()
            .await
            .map_err(|e| ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        if output.status.success() {
            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
            })
        } else {
            Err(ConnectionError::CommandFailed {
                exit_code,
                stdout,
                stderr,
            })
        }
    }

    async fn put_file(&self, content: &[u8], dst: &str, mode: u32) -> ConnectionResult<()> {
        debug!(dst = %dst, size = %content.len(), "Writing content locally");
        let path = Path::new(dst);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ConnectionError::TransferFailed(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        tokio::fs::write(path, content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to write {}: {}", dst, e))
        })?;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| {
                ConnectionError::TransferFailed(format!("Failed to set mode on {}: {}", dst, e))
            })?;
        Ok(())
    }

    async fn fetch_file(&self, src: &str) -> ConnectionResult<Vec<u8>> {
        tokio::fs::read(src)
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("Failed to read {}: {}", src, e)))
    }

    fn gather_facts(&self) -> Option<&dyn GatherFacts> {
        Some(self)
    }
}

#[async_trait]
impl GatherFacts for LocalConnector {
    /// Facts of the control node. Hostname and architecture come from the
    /// process itself; the rest is probed like any other host.
    async fn host_info(&self) -> ConnectionResult<JsonMap> {
        let mut info = facts::probe(self).await?;
        if let Some(os) = info.get_mut("os").and_then(|o| o.as_object_mut()) {
            if let Ok(name) = hostname::get() {
                os.insert(
                    "hostname".to_string(),
                    name.to_string_lossy().to_string().into(),
                );
            }
            os.insert(
                "architecture".to_string(),
                std::env::consts::ARCH.to_string().into(),
            );
        }
        Ok(info)
    }
}
