//! Relay configuration types.
//!
//! The core crates consume a validated [`RelayConfig`] snapshot; loading and
//! parsing configuration files is the hosting binary's job. Nothing in here
//! touches the filesystem.

mod credentials;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use credentials::{CredentialProvider, SmbCredentials};

/// Transport used to move files to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Ssh,
    Smb,
}

/// Policy applied when the destination already holds a file of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Insert a timestamp suffix before the extension until the name is free.
    #[default]
    Append,
    /// Replace the existing file in place.
    Overwrite,
    /// Treat an existing file as a terminal, non-retryable failure.
    Skip,
}

/// Retry behavior for a single transfer attempt sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Additional attempts after the first (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Cap on the backoff delay, in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_secs: 300,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Limits applied to source files before any transfer is attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityLimits {
    /// Maximum source file size in bytes.
    pub max_file_size: u64,
    /// Whether dot-files are eligible for transfer.
    pub allow_hidden: bool,
    /// Whether files with executable/script extensions are eligible.
    pub allow_executable: bool,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            // 10 GiB
            max_file_size: 10 * 1024 * 1024 * 1024,
            allow_hidden: false,
            allow_executable: false,
        }
    }
}

/// Host-key verification policy for the SSH transport.
///
/// The relay runs unattended, so interactive prompting is never an option:
/// either trust-on-first-use against a per-install known_hosts file, or no
/// checking at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    #[default]
    AcceptNew,
    Off,
}

/// SSH/SCP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    /// Private key used for public-key authentication.
    pub identity_file: PathBuf,
    /// Remote destination root the watch directory is mirrored onto.
    pub destination: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// Per-install known_hosts file used with [`HostKeyPolicy::AcceptNew`].
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,
    /// Remote server is Windows — affects drive-letter path translation.
    #[serde(default)]
    pub remote_is_windows: bool,
    #[serde(default)]
    pub compression: bool,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_transfer_timeout_secs() -> u64 {
    300
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

/// SMB transport settings.
///
/// `root` is where the share is reachable with local filesystem semantics: a
/// UNC path on Windows, a mount point elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmbSettings {
    pub server: String,
    pub share: String,
    pub root: PathBuf,
    /// Key handed to the [`CredentialProvider`] when the share needs an
    /// authenticated connection. Absent means the share is already reachable.
    #[serde(default)]
    pub credential_key: Option<String>,
}

/// Read-only configuration snapshot consumed by the relay core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Local directory monitored for files to relay.
    pub watch_dir: PathBuf,
    pub method: TransferMethod,
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    /// Quiet period after the last write before a file is considered stable.
    #[serde(default = "default_stability_secs")]
    pub stability_secs: u64,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Move transferred sources into `archive_dir`. Takes precedence over
    /// `delete_after_transfer` when both are set.
    #[serde(default)]
    pub archive_after_transfer: bool,
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    #[serde(default)]
    pub delete_after_transfer: bool,
    #[serde(default = "default_true")]
    pub verify_transfer: bool,
    /// Free-space headroom required at the destination beyond the file size.
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
    #[serde(default)]
    pub security: SecurityLimits,
    /// Directory receiving one serialized result record per attempt sequence.
    #[serde(default)]
    pub status_dir: Option<PathBuf>,
    /// Advisory only: the drain loop processes files sequentially regardless.
    #[serde(default = "default_one")]
    pub max_concurrent_transfers: u32,
    #[serde(default)]
    pub ssh: Option<SshSettings>,
    #[serde(default)]
    pub smb: Option<SmbSettings>,
}

fn default_drain_interval_secs() -> u64 {
    5
}

fn default_stability_secs() -> u64 {
    5
}

fn default_max_queue_size() -> usize {
    1_000
}

fn default_min_free_space() -> u64 {
    100 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

impl RelayConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stability_secs)
    }

    /// Checks cross-field consistency. The loading collaborator calls this
    /// once; the core assumes it has passed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.method {
            TransferMethod::Ssh if self.ssh.is_none() => {
                return Err(ConfigError::MissingTransport("ssh"));
            }
            TransferMethod::Smb if self.smb.is_none() => {
                return Err(ConfigError::MissingTransport("smb"));
            }
            _ => {}
        }
        if self.archive_after_transfer && self.archive_dir.is_none() {
            return Err(ConfigError::MissingArchiveDir);
        }
        if self.watch_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyWatchDir);
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::BackoffBelowOne(self.retry.backoff_multiplier));
        }
        Ok(())
    }
}

/// Cross-field configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("transfer method is {0} but no {0} settings were provided")]
    MissingTransport(&'static str),

    #[error("archive_after_transfer is set but archive_dir is missing")]
    MissingArchiveDir,

    #[error("watch_dir must not be empty")]
    EmptyWatchDir,

    #[error("backoff multiplier {0} is below 1.0")]
    BackoffBelowOne(f64),
}
