//! SMB transport.
//!
//! Relies on the OS redirector: the share is a UNC path on Windows or a
//! mounted path elsewhere, and the copy itself has local filesystem
//! semantics. When a credential key is configured, an authenticated
//! connection is established first through the same [`CommandRunner`] seam
//! the SSH transport uses, so tests never touch a real share.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ferry_config::{CredentialProvider, RelayConfig, SmbCredentials, SmbSettings};
use ferry_retry::{RetryPolicy, io_error_retryable};

use crate::conflict::resolve_local_conflict;
use crate::disk::check_available_space;
use crate::error::TransferError;
use crate::exec::{CommandRunner, CommandSpec};
use crate::result::TransferResult;
use crate::service::{AttemptContext, TransferService, finalize_source};
use crate::ssh::{display_retry_error, prepare_source};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SmbTransfer {
    config: Arc<RelayConfig>,
    smb: SmbSettings,
    credentials: Arc<dyn CredentialProvider>,
    runner: Arc<dyn CommandRunner>,
    policy: RetryPolicy,
}

impl SmbTransfer {
    pub fn new(
        config: Arc<RelayConfig>,
        credentials: Arc<dyn CredentialProvider>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, TransferError> {
        let smb = config
            .smb
            .clone()
            .ok_or_else(|| TransferError::Config("smb settings missing".into()))?;
        ferry_security::validate_hostname(&smb.server)?;

        let policy = RetryPolicy::from(&config.retry);
        Ok(Self {
            config,
            smb,
            credentials,
            runner,
            policy,
        })
    }

    fn unc_path(&self) -> String {
        format!("\\\\{}\\{}", self.smb.server, self.smb.share)
    }

    /// Establishes the authenticated share connection when configured.
    /// Without a credential key the share is assumed reachable already
    /// (pre-mounted, or machine-account access).
    async fn connect_share(&self) -> Result<(), TransferError> {
        let Some(key) = &self.smb.credential_key else {
            return Ok(());
        };
        let creds = self
            .credentials
            .smb_credentials(key)
            .ok_or_else(|| TransferError::MissingCredentials(key.clone()))?;

        let spec = connect_spec(&self.unc_path(), &creds);
        let output = self.runner.run(&spec).await?;
        if output.success() {
            return Ok(());
        }

        let detail = output.stderr.trim().to_string();
        let lower = detail.to_ascii_lowercase();
        if lower.contains("password is invalid")
            || lower.contains("logon failure")
            || lower.contains("access is denied")
        {
            Err(TransferError::Auth(detail))
        } else {
            Err(TransferError::Connection(detail))
        }
    }

    /// One retryable attempt: connect, headroom check, conflict resolution,
    /// copy, size verification.
    async fn attempt(
        &self,
        source: &Path,
        relative: &Path,
        file_size: u64,
    ) -> Result<(PathBuf, bool), TransferError> {
        self.connect_share().await?;

        let destination = self.smb.root.join(relative);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        check_available_space(&destination, file_size, self.config.min_free_space)?;

        let destination = resolve_local_conflict(&destination, self.config.conflict_policy)?;
        tokio::fs::copy(source, &destination).await?;

        let verified = if self.config.verify_transfer {
            let copied = tokio::fs::metadata(&destination).await?.len();
            if copied != file_size {
                tracing::warn!(
                    source = %source.display(),
                    destination = %destination.display(),
                    local_size = file_size,
                    copied_size = copied,
                    "size verification failed"
                );
            }
            copied == file_size
        } else {
            false
        };

        Ok((destination, verified))
    }
}

impl TransferService for SmbTransfer {
    fn transfer_file<'a>(
        &'a self,
        source: &'a Path,
        dest_override: Option<&'a Path>,
    ) -> Pin<Box<dyn Future<Output = TransferResult> + Send + 'a>> {
        Box::pin(async move {
            let context = AttemptContext::begin(0);
            let metadata = match tokio::fs::metadata(source).await {
                Ok(metadata) => metadata,
                Err(_) => {
                    return context.failure(
                        source,
                        String::new(),
                        self.method_name(),
                        0,
                        TransferError::SourceMissing(source.to_path_buf()).to_string(),
                    );
                }
            };
            let file_size = metadata.len();
            let context = AttemptContext {
                file_size,
                ..context
            };

            let relative = match prepare_source(source, &self.config, file_size, dest_override) {
                Ok(relative) => relative,
                Err(error) => {
                    return context.failure(
                        source,
                        self.smb.root.display().to_string(),
                        self.method_name(),
                        0,
                        error.to_string(),
                    );
                }
            };

            let outcome = self
                .policy
                .execute_with_retry("smb transfer", || {
                    self.attempt(source, &relative, file_size)
                })
                .await;

            match outcome {
                Ok(outcome) => {
                    let retries = outcome.retries();
                    let (destination, verified) = outcome.value;
                    let destination = destination.display().to_string();
                    if verified || !self.config.verify_transfer {
                        finalize_source(source, &relative, &self.config).await;
                        context.success(source, destination, self.method_name(), verified, retries)
                    } else {
                        let mut result = context.success(
                            source,
                            destination,
                            self.method_name(),
                            false,
                            retries,
                        );
                        result.error = Some("size verification failed".into());
                        result
                    }
                }
                Err(error) => {
                    let retries = error.attempts().saturating_sub(1);
                    context.failure(
                        source,
                        self.smb.root.join(&relative).display().to_string(),
                        self.method_name(),
                        retries,
                        display_retry_error(&error),
                    )
                }
            }
        })
    }

    fn test_connection(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            if let Err(error) = self.connect_share().await {
                tracing::warn!(server = %self.smb.server, error = %error, "smb connection test failed");
                return false;
            }
            match tokio::fs::metadata(&self.smb.root).await {
                Ok(metadata) => metadata.is_dir(),
                Err(error) => {
                    tracing::warn!(
                        root = %self.smb.root.display(),
                        error = %error,
                        retryable = io_error_retryable(&error),
                        "smb destination root not reachable"
                    );
                    false
                }
            }
        })
    }

    fn verify_transfer<'a>(
        &'a self,
        source: &'a Path,
        destination: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, TransferError>> + Send + 'a>> {
        Box::pin(async move {
            let local = tokio::fs::metadata(source).await?.len();
            let copied = tokio::fs::metadata(destination).await?.len();
            Ok(local == copied)
        })
    }

    fn method_name(&self) -> &'static str {
        "smb"
    }
}

/// `net use \\server\share <password> /user:DOMAIN\user` argv. Built in one
/// place so the credential handling is testable without a Windows host.
fn connect_spec(unc: &str, creds: &SmbCredentials) -> CommandSpec {
    CommandSpec::new(
        "net",
        vec![
            "use".into(),
            unc.to_string(),
            creds.password.clone(),
            format!("/user:{}", creds.qualified_username()),
        ],
        CONNECT_TIMEOUT,
    )
}
