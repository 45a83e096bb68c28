//! Status sink: one JSON file per finished attempt sequence.
//!
//! External monitoring reads these files; the relay only ever writes them.
//! A write failure must never take a transfer down with it, so every error
//! here is a warning.

use std::path::PathBuf;

use ferry_transfer::TransferResult;
use sha2::{Digest, Sha256};

pub struct StatusWriter {
    dir: PathBuf,
}

impl StatusWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Serializes the result into `<dir>/transfer_<id>.json`, via a temp
    /// file and rename so readers never see a partial record.
    /// `last_write_millis` is the source file's modification time, captured
    /// before the transfer ran.
    pub async fn write(&self, result: &TransferResult, last_write_millis: i64) {
        let id = status_id(&result.file_name, last_write_millis);
        let target = self.dir.join(format!("transfer_{id}.json"));
        let staging = self.dir.join(format!("transfer_{id}.json.tmp"));

        if let Err(error) = self.write_inner(result, &staging, &target).await {
            tracing::warn!(
                file = %result.file_name,
                path = %target.display(),
                error = %error,
                "failed to write status record"
            );
        }
    }

    async fn write_inner(
        &self,
        result: &TransferResult,
        staging: &std::path::Path,
        target: &std::path::Path,
    ) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(staging, json).await?;
        tokio::fs::rename(staging, target).await
    }
}

/// Stable short identifier for a status record: the first 16 hex characters
/// of SHA-256 over the file name and its last-write time.
pub fn status_id(file_name: &str, last_write_millis: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_name.as_bytes());
    hasher.update(last_write_millis.to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::Path;

    fn sample_result() -> TransferResult {
        TransferResult::success(
            Path::new("/watch/data.csv"),
            "/mnt/drop/data.csv".into(),
            1024,
            Utc::now(),
            "smb",
            true,
            0,
        )
    }

    #[test]
    fn id_is_16_hex_chars_and_deterministic() {
        let a = status_id("data.csv", 1_756_300_000_000);
        let b = status_id("data.csv", 1_756_300_000_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(a, status_id("data.csv", 1_756_300_000_001));
        assert_ne!(a, status_id("other.csv", 1_756_300_000_000));
    }

    #[tokio::test]
    async fn writes_readable_record_and_no_temp_leftover() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StatusWriter::new(dir.path().to_path_buf());
        let result = sample_result();

        writer.write(&result, 1_756_300_000_000).await;

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("transfer_"));
        assert!(files[0].ends_with(".json"));

        let back: TransferResult =
            serde_json::from_slice(&std::fs::read(dir.path().join(&files[0])).unwrap()).unwrap();
        assert_eq!(back.id, result.id);
        assert_eq!(back.file_name, "data.csv");
    }

    #[tokio::test]
    async fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("status/daily");
        let writer = StatusWriter::new(nested.clone());

        writer.write(&sample_result(), 0).await;
        assert_eq!(std::fs::read_dir(&nested).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn unwritable_directory_only_warns() {
        // Status sink failures are non-fatal by contract.
        let writer = StatusWriter::new(PathBuf::from("/proc/ferry-no-such-place"));
        writer.write(&sample_result(), 0).await;
    }
}
