//! Fetch module - copy a file from the target host to the control node

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use super::{ExecOptions, Module, ModuleError, ModuleOutput, ModuleResult, ParamExt};

/// Module for fetching files from hosts
pub struct FetchModule;

#[async_trait]
impl Module for FetchModule {
    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn execute(&self, opts: ExecOptions) -> ModuleResult<ModuleOutput> {
        let src = opts.args.get_string_required("src")?;
        let dest = opts.args.get_string_required("dest")?;

        let conn = opts.connector().await?;
        let result = conn.fetch_file(&src).await;
        conn.close().await?;
        let body = result?;

        let dest = Path::new(&dest);
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &body).await.map_err(|e| {
            ModuleError::ExecutionFailed(format!("cannot write {}: {}", dest.display(), e))
        })?;
        debug!(host = %opts.host, src = %src, dest = %dest.display(), "fetched file");
        Ok(ModuleOutput::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::options;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fetch_writes_locally() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("remote.txt");
        std::fs::write(&src, "remote data").unwrap();
        let dest = dir.path().join("fetched/local.txt");
        FetchModule
            .execute(options(json!({
                "src": src.to_str().unwrap(),
                "dest": dest.to_str().unwrap(),
            })))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "remote data");
    }

    #[tokio::test]
    async fn test_fetch_missing_source() {
        let err = FetchModule
            .execute(options(json!({"src": "/no/such/file", "dest": "/tmp/x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Connection(_)));
    }
}
