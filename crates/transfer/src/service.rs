//! Transport-agnostic service trait, factory, and the pipeline steps both
//! transports share.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use ferry_config::{CredentialProvider, RelayConfig, TransferMethod};

use crate::conflict::stamped_name;
use crate::error::TransferError;
use crate::exec::CommandRunner;
use crate::result::TransferResult;
use crate::smb::SmbTransfer;
use crate::ssh::SshTransfer;

/// One transport backend. Implementations are stateless per call apart from
/// configuration and injected dependencies; they own no queue state.
pub trait TransferService: Send + Sync {
    /// Runs the full pipeline for one file, retries included. Always returns
    /// a result record; failures are carried in `success`/`error`.
    fn transfer_file<'a>(
        &'a self,
        source: &'a Path,
        dest_override: Option<&'a Path>,
    ) -> Pin<Box<dyn Future<Output = TransferResult> + Send + 'a>>;

    /// Cheap reachability probe for startup diagnostics.
    fn test_connection(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Compares source size against the destination copy.
    fn verify_transfer<'a>(
        &'a self,
        source: &'a Path,
        destination: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, TransferError>> + Send + 'a>>;

    fn method_name(&self) -> &'static str;
}

/// Builds the transport selected by the configuration.
pub fn create_service(
    config: Arc<RelayConfig>,
    credentials: Arc<dyn CredentialProvider>,
    runner: Arc<dyn CommandRunner>,
) -> Result<Arc<dyn TransferService>, TransferError> {
    match config.method {
        TransferMethod::Ssh => Ok(Arc::new(SshTransfer::new(config, runner)?)),
        TransferMethod::Smb => Ok(Arc::new(SmbTransfer::new(config, credentials, runner)?)),
    }
}

/// Mirrors the source's position under the watch directory, or takes the
/// explicit override as-is.
pub(crate) fn relative_destination(
    source: &Path,
    watch_dir: &Path,
    dest_override: Option<&Path>,
) -> Result<PathBuf, TransferError> {
    if let Some(override_path) = dest_override {
        return Ok(override_path.to_path_buf());
    }
    let relative = source
        .strip_prefix(watch_dir)
        .map_err(|_| TransferError::OutsideWatchRoot(source.to_path_buf()))?;
    ferry_security::validate_relative_path(relative)?;
    Ok(relative.to_path_buf())
}

/// Post-transfer housekeeping. Archive wins over delete when both are set;
/// with neither, the source stays put for the operator. Failures here are
/// warnings only — the remote copy already succeeded.
pub(crate) async fn finalize_source(source: &Path, relative: &Path, config: &RelayConfig) {
    if config.archive_after_transfer {
        let Some(archive_root) = &config.archive_dir else {
            tracing::warn!("archive_after_transfer set without archive_dir, leaving source");
            return;
        };
        if let Err(error) = archive_file(source, relative, archive_root).await {
            tracing::warn!(
                source = %source.display(),
                error = %error,
                "failed to archive transferred file"
            );
        }
    } else if config.delete_after_transfer {
        if let Err(error) = tokio::fs::remove_file(source).await {
            tracing::warn!(
                source = %source.display(),
                error = %error,
                "failed to delete transferred file"
            );
        }
    }
}

/// Moves the source into the archive, mirroring its relative path. A
/// colliding archive name gets a timestamp suffix rather than replacing the
/// earlier copy.
async fn archive_file(
    source: &Path,
    relative: &Path,
    archive_root: &Path,
) -> Result<(), TransferError> {
    let mut target = archive_root.join(relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if target.exists() {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = target.parent().map(Path::to_path_buf).unwrap_or_default();
        target = parent.join(stamped_name(&name, &Utc::now()));
    }

    match tokio::fs::rename(source, &target).await {
        Ok(()) => Ok(()),
        // Archive on another volume: rename fails, fall back to copy+remove.
        Err(_) => {
            tokio::fs::copy(source, &target).await?;
            tokio::fs::remove_file(source).await?;
            Ok(())
        }
    }
}

/// Shared skeleton for building result records around a retried attempt.
pub(crate) struct AttemptContext {
    pub started_at: chrono::DateTime<Utc>,
    pub file_size: u64,
}

impl AttemptContext {
    pub(crate) fn begin(file_size: u64) -> Self {
        Self {
            started_at: Utc::now(),
            file_size,
        }
    }

    pub(crate) fn success(
        &self,
        source: &Path,
        destination: String,
        method: &str,
        verified: bool,
        retries: u32,
    ) -> TransferResult {
        TransferResult::success(
            source,
            destination,
            self.file_size,
            self.started_at,
            method,
            verified,
            retries,
        )
    }

    pub(crate) fn failure(
        &self,
        source: &Path,
        destination: String,
        method: &str,
        retries: u32,
        error: String,
    ) -> TransferResult {
        TransferResult::failure(
            source,
            destination,
            self.file_size,
            self.started_at,
            method,
            retries,
            error,
        )
    }
}
