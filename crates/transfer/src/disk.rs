//! Destination free-space pre-flight.

use std::path::Path;

use sysinfo::Disks;

use crate::error::TransferError;

/// Requires `file_size + min_free` bytes at the destination's volume.
///
/// The destination is matched to the most specific mount point (longest
/// prefix). When no mount point matches — network redirector paths often
/// don't enumerate — the check logs and passes: it is advisory, and a broken
/// check must not stop transfers.
pub fn check_available_space(
    destination: &Path,
    file_size: u64,
    min_free: u64,
) -> Result<(), TransferError> {
    let disks = Disks::new_with_refreshed_list();

    // Relative destinations have to be absolute before mount-point matching.
    let absolute = std::fs::canonicalize(destination)
        .or_else(|_| {
            destination
                .parent()
                .map(std::fs::canonicalize)
                .unwrap_or_else(|| Ok(destination.to_path_buf()))
        })
        .unwrap_or_else(|_| destination.to_path_buf());
    let dest_str = absolute.to_string_lossy();

    let mut available: Option<u64> = None;
    let mut longest_match = 0;
    for disk in disks.list() {
        let mount = disk.mount_point().to_string_lossy();
        if dest_str.starts_with(mount.as_ref()) && mount.len() > longest_match {
            available = Some(disk.available_space());
            longest_match = mount.len();
        }
    }

    let required = file_size.saturating_add(min_free);
    match available {
        Some(free) if free >= required => Ok(()),
        Some(free) => Err(TransferError::DiskSpace {
            available: free,
            required,
        }),
        None => {
            tracing::warn!(
                destination = %destination.display(),
                "could not resolve a mount point for the destination, skipping space check"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempdir_passes_with_zero_requirements() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_available_space(dir.path(), 0, 0).is_ok());
    }

    #[test]
    fn absurd_requirement_fails_closed() {
        if Disks::new_with_refreshed_list().list().is_empty() {
            // No enumerable volumes (minimal containers) — the check is
            // advisory and passes, nothing to assert here.
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let err = check_available_space(dir.path(), u64::MAX / 2, u64::MAX / 2);
        assert!(matches!(err, Err(TransferError::DiskSpace { .. })));
    }

    #[test]
    fn unresolvable_destination_fails_open() {
        // Even a path that exists on no volume must pass rather than block.
        let ghost = Path::new("/nonexistent-volume-ferry/sub/file.bin");
        assert!(check_available_space(ghost, 1024, 1024).is_ok());
    }
}
