//! Immutable outcome record for one transfer attempt sequence.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Created once per attempt sequence (success or after retries are
/// exhausted) and never mutated. Serialized to the status sink for the
/// external status reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub id: Uuid,
    pub success: bool,
    pub file_name: String,
    pub source: PathBuf,
    pub destination: String,
    pub file_size: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Transport label, e.g. `ssh` or `smb`.
    pub method: String,
    /// Size verification passed. Always false when verification is disabled
    /// or the transfer failed.
    pub verified: bool,
    /// Retries performed beyond the first attempt.
    pub retries: u32,
    pub error: Option<String>,
}

impl TransferResult {
    pub fn success(
        source: &Path,
        destination: String,
        file_size: u64,
        started_at: DateTime<Utc>,
        method: &str,
        verified: bool,
        retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            success: true,
            file_name: file_name_of(source),
            source: source.to_path_buf(),
            destination,
            file_size,
            started_at,
            finished_at: Utc::now(),
            method: method.to_string(),
            verified,
            retries,
            error: None,
        }
    }

    pub fn failure(
        source: &Path,
        destination: String,
        file_size: u64,
        started_at: DateTime<Utc>,
        method: &str,
        retries: u32,
        error: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            success: false,
            file_name: file_name_of(source),
            source: source.to_path_buf(),
            destination,
            file_size,
            started_at,
            finished_at: Utc::now(),
            method: method.to_string(),
            verified: false,
            retries,
            error: Some(error),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
