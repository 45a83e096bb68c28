//! Transfer error taxonomy.
//!
//! The retry layer consults [`RetryClass`] to decide whether another attempt
//! can help. Validation, conflict, and credential problems are terminal;
//! connection-shaped problems are not.

use std::path::PathBuf;

use ferry_retry::{RetryClass, io_error_retryable};
use ferry_security::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("source file disappeared: {0}")]
    SourceMissing(PathBuf),

    #[error("source {0} is outside the watch directory")]
    OutsideWatchRoot(PathBuf),

    #[error("destination already exists: {0}")]
    AlreadyExists(String),

    #[error("no credentials found for key '{0}'")]
    MissingCredentials(String),

    #[error("transport configuration error: {0}")]
    Config(String),

    #[error("SSH identity file not found: {0}")]
    IdentityFileMissing(PathBuf),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("host key verification failed: {0}")]
    HostKey(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("{program} did not finish within {seconds}s and was killed")]
    Timeout { program: String, seconds: u64 },

    #[error("insufficient disk space at destination: {available} bytes free, {required} required")]
    DiskSpace { available: u64, required: u64 },

    #[error("remote directory missing: {0}")]
    RemoteDirMissing(String),

    #[error("remote disk full: {0}")]
    RemoteDiskFull(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed: {detail}")]
    CommandFailed { program: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetryClass for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            // Terminal: retrying cannot change the outcome, and retrying
            // auth failures risks locking the service account.
            TransferError::Validation(_)
            | TransferError::SourceMissing(_)
            | TransferError::OutsideWatchRoot(_)
            | TransferError::AlreadyExists(_)
            | TransferError::MissingCredentials(_)
            | TransferError::Config(_)
            | TransferError::IdentityFileMissing(_)
            | TransferError::Auth(_)
            | TransferError::HostKey(_) => false,

            // Transient transport conditions.
            TransferError::Connection(_)
            | TransferError::Timeout { .. }
            | TransferError::DiskSpace { .. }
            | TransferError::RemoteDirMissing(_)
            | TransferError::RemoteDiskFull(_)
            | TransferError::CommandFailed { .. } => true,

            // A spawn failure is usually a missing binary (permanent) but
            // can be resource exhaustion; defer to the I/O tables.
            TransferError::Spawn { source, .. } => io_error_retryable(source),
            TransferError::Io(source) => io_error_retryable(source),
        }
    }
}
