//! Destination name-conflict resolution.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ferry_config::ConflictPolicy;

use crate::error::TransferError;

/// Inserts `_yyyyMMdd-HHmmss` before the extension:
/// `report.txt` → `report_20260827-143000.txt`.
pub fn stamped_name(name: &str, stamp: &DateTime<Utc>) -> String {
    let stamp = stamp.format("%Y%m%d-%H%M%S");
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{stamp}.{ext}"),
        _ => format!("{name}_{stamp}"),
    }
}

/// Resolves a local destination path against the conflict policy.
///
/// - `Overwrite`: removes the existing file, keeps the path.
/// - `Skip`: an existing file is a terminal error.
/// - `Append`: stamps the name, then appends a counter until the candidate
///   is free — repeated transfers within one second still get unique names.
pub fn resolve_local_conflict(
    destination: &Path,
    policy: ConflictPolicy,
) -> Result<PathBuf, TransferError> {
    if !destination.exists() {
        return Ok(destination.to_path_buf());
    }

    match policy {
        ConflictPolicy::Overwrite => {
            std::fs::remove_file(destination)?;
            Ok(destination.to_path_buf())
        }
        ConflictPolicy::Skip => Err(TransferError::AlreadyExists(
            destination.display().to_string(),
        )),
        ConflictPolicy::Append => {
            let name = destination
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    TransferError::AlreadyExists(destination.display().to_string())
                })?;
            let parent = destination.parent().unwrap_or_else(|| Path::new(""));
            let base = stamped_name(&name, &Utc::now());

            let mut candidate = parent.join(&base);
            let mut counter = 1u32;
            while candidate.exists() {
                let suffixed = match base.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => {
                        format!("{stem}-{counter}.{ext}")
                    }
                    _ => format!("{base}-{counter}"),
                };
                candidate = parent.join(suffixed);
                counter += 1;
            }
            Ok(candidate)
        }
    }
}
