//! Copy module - write a file to the target host
//!
//! The file body is either inline `content` or a `src` file. A relative `src`
//! is looked up in the project (the task's role `files/` first); an absolute
//! one is read from the control node. A `dest` ending in `/` receives the
//! file under its source name.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use super::{ExecOptions, Module, ModuleError, ModuleOutput, ModuleResult, ParamExt};

/// Default permission bits for written files
const DEFAULT_MODE: u32 = 0o644;

/// Module for copying content to hosts
pub struct CopyModule;

impl CopyModule {
    fn destination(dest: &str, src: Option<&str>) -> ModuleResult<String> {
        if !dest.ends_with('/') {
            return Ok(dest.to_string());
        }
        let name = src
            .and_then(|s| Path::new(s).file_name())
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ModuleError::InvalidParameter("\"content\" should copy to a file".to_string())
            })?;
        Ok(format!("{}{}", dest, name))
    }
}

#[async_trait]
impl Module for CopyModule {
    fn name(&self) -> &'static str {
        "copy"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        let args = &opts.args;
        let dest = args.get_string_required("dest")?;
        let mode = args.get_mode("mode")?.unwrap_or(DEFAULT_MODE);
        let src = args.get_string("src")?.filter(|s| !s.is_empty());

        let body = match (&src, args.get_string("content")?) {
            (Some(src), _) => opts.files.read_file(opts.role.as_deref(), src).await.map_err(|e| {
                ModuleError::ExecutionFailed(format!("cannot read source file {}: {}", src, e))
            })?,
            (None, Some(content)) => content.into_bytes(),
            (None, None) => {
                return Err(ModuleError::MissingParameter(
                    "either \"src\" or \"content\" must be provided".to_string(),
                ))
            }
        };
        let dest = Self::destination(&dest, src.as_deref())?;

        debug!(host = %opts.host, dest = %dest, size = body.len(), "copying file");
        let conn = opts.connector().await?;
        let result = conn.put_file(&body, &dest, mode).await;
        conn.close().await?;
        result?;
        Ok(ModuleOutput::success())
    }
}
