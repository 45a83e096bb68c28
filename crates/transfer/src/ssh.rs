//! SSH/SCP transport.
//!
//! Shells out to the platform `scp` and `ssh` binaries. Everything that ends
//! up on a command line is validated in [`SshTransfer::new`] or derived from
//! validated parts, and the identity-file argument is redacted before any
//! argv reaches a log line. Host-key handling is strictly non-interactive:
//! trust-on-first-use against a per-install known_hosts file, or disabled.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ferry_config::{ConflictPolicy, HostKeyPolicy, RelayConfig, SshSettings};
use ferry_retry::{RetryError, RetryPolicy};

use crate::conflict::stamped_name;
use crate::error::TransferError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec, redacted_args};
use crate::result::TransferResult;
use crate::service::{AttemptContext, TransferService, finalize_source, relative_destination};

pub struct SshTransfer {
    config: Arc<RelayConfig>,
    ssh: SshSettings,
    runner: Arc<dyn CommandRunner>,
    policy: RetryPolicy,
}

impl SshTransfer {
    /// Validates endpoint identifiers and the identity file up front —
    /// a bad host, user, or missing key must fail before any process is
    /// spawned, and must never be retried.
    pub fn new(
        config: Arc<RelayConfig>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, TransferError> {
        let ssh = config
            .ssh
            .clone()
            .ok_or_else(|| TransferError::Config("ssh settings missing".into()))?;

        ferry_security::validate_hostname(&ssh.host)?;
        ferry_security::validate_username(&ssh.user)?;
        ferry_security::validate_remote_path(&ssh.destination)?;
        if !ssh.identity_file.exists() {
            return Err(TransferError::IdentityFileMissing(ssh.identity_file.clone()));
        }

        let policy = RetryPolicy::from(&config.retry);
        Ok(Self {
            config,
            ssh,
            runner,
            policy,
        })
    }

    /// Destination root with drive-letter translation applied.
    fn remote_root(&self) -> String {
        translate_remote_path(&self.ssh.destination, self.ssh.remote_is_windows)
    }

    fn remote_target(&self, relative: &Path) -> String {
        let mut target = self.remote_root();
        for component in relative.components() {
            if !target.ends_with('/') {
                target.push('/');
            }
            target.push_str(&component.as_os_str().to_string_lossy());
        }
        target
    }

    /// Options shared by every ssh/scp invocation: unattended operation
    /// only, never an interactive host-key prompt.
    fn common_options(&self) -> Vec<String> {
        let mut options = vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.ssh.connect_timeout_secs),
        ];
        match self.ssh.host_key_policy {
            HostKeyPolicy::AcceptNew => {
                options.push("-o".into());
                options.push("StrictHostKeyChecking=accept-new".into());
                if let Some(known_hosts) = &self.ssh.known_hosts_file {
                    options.push("-o".into());
                    options.push(format!("UserKnownHostsFile={}", known_hosts.display()));
                }
            }
            HostKeyPolicy::Off => {
                options.push("-o".into());
                options.push("StrictHostKeyChecking=no".into());
                options.push("-o".into());
                options.push("UserKnownHostsFile=/dev/null".into());
            }
        }
        options
    }

    fn scp_spec(&self, source: &Path, remote_path: &str) -> CommandSpec {
        let mut args = vec![
            "-P".to_string(),
            self.ssh.port.to_string(),
            "-i".to_string(),
            self.ssh.identity_file.display().to_string(),
        ];
        if self.ssh.compression {
            args.push("-C".into());
        }
        args.extend(self.common_options());
        args.push(source.display().to_string());
        args.push(format!(
            "{}@{}:'{}'",
            self.ssh.user, self.ssh.host, remote_path
        ));
        CommandSpec::new("scp", args, self.ssh.transfer_timeout())
    }

    /// A remote command run over ssh. `remote_path` arguments embedded in
    /// `command` must already be validated (no quotes, no traversal).
    fn ssh_spec(&self, command: String, timeout: Duration) -> CommandSpec {
        let mut args = vec![
            "-p".to_string(),
            self.ssh.port.to_string(),
            "-i".to_string(),
            self.ssh.identity_file.display().to_string(),
        ];
        args.extend(self.common_options());
        args.push(format!("{}@{}", self.ssh.user, self.ssh.host));
        args.push(command);
        CommandSpec::new("ssh", args, timeout)
    }

    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, TransferError> {
        let output = self.runner.run(spec).await?;
        if output.success() {
            Ok(output)
        } else {
            tracing::debug!(
                program = %spec.program,
                args = %redacted_args(&spec.args).join(" "),
                code = ?output.code,
                "remote tool failed"
            );
            Err(classify_tool_failure(&spec.program, &output.stderr))
        }
    }

    async fn remote_exists(&self, remote_path: &str) -> Result<bool, TransferError> {
        let spec = self.ssh_spec(
            format!("test -e '{remote_path}'"),
            self.ssh.connect_timeout(),
        );
        let output = self.runner.run(&spec).await?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(classify_tool_failure("ssh", &output.stderr)),
        }
    }

    async fn ensure_remote_dir(&self, remote_dir: &str) -> Result<(), TransferError> {
        let spec = self.ssh_spec(
            format!("mkdir -p '{remote_dir}'"),
            self.ssh.connect_timeout(),
        );
        self.run_checked(&spec).await.map(|_| ())
    }

    async fn remote_size(&self, remote_path: &str) -> Result<u64, TransferError> {
        let spec = self.ssh_spec(
            format!("stat -c %s '{remote_path}'"),
            self.ssh.connect_timeout(),
        );
        let output = self.run_checked(&spec).await?;
        output
            .stdout
            .trim()
            .parse::<u64>()
            .map_err(|_| TransferError::CommandFailed {
                program: "ssh".into(),
                detail: format!("unparseable stat output: {:.64}", output.stdout.trim()),
            })
    }

    /// One retryable attempt: ensure the remote directory, settle the name
    /// conflict, upload, verify. Returns the final remote path and the
    /// verification verdict.
    async fn attempt(
        &self,
        source: &Path,
        relative: &Path,
        file_size: u64,
    ) -> Result<(String, bool), TransferError> {
        let mut target = self.remote_target(relative);
        ferry_security::validate_remote_path(&target)?;

        if let Some(slash) = target.rfind('/')
            && slash > 0
        {
            self.ensure_remote_dir(&target[..slash]).await?;
        }

        // Conflict resolution. The stamped candidate is used as-is for the
        // remote side — no second existence probe.
        if self.config.conflict_policy != ConflictPolicy::Overwrite
            && self.remote_exists(&target).await?
        {
            match self.config.conflict_policy {
                ConflictPolicy::Skip => {
                    return Err(TransferError::AlreadyExists(target));
                }
                ConflictPolicy::Append => {
                    let (dir, name) = match target.rfind('/') {
                        Some(slash) => (&target[..=slash], &target[slash + 1..]),
                        None => ("", target.as_str()),
                    };
                    target = format!("{dir}{}", stamped_name(name, &Utc::now()));
                }
                ConflictPolicy::Overwrite => unreachable!(),
            }
        }

        let spec = self.scp_spec(source, &target);
        self.run_checked(&spec).await?;

        let verified = if self.config.verify_transfer {
            let remote = self.remote_size(&target).await?;
            if remote != file_size {
                tracing::warn!(
                    source = %source.display(),
                    remote_path = %target,
                    local_size = file_size,
                    remote_size = remote,
                    "size verification failed"
                );
            }
            remote == file_size
        } else {
            false
        };

        Ok((target, verified))
    }
}

impl TransferService for SshTransfer {
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

            // Non-retryable validation, before any process is spawned.
            let relative = match prepare_source(source, &self.config, file_size, dest_override) {
                Ok(relative) => relative,
                Err(error) => {
                    return context.failure(
                        source,
                        self.remote_root(),
                        self.method_name(),
                        0,
                        error.to_string(),
                    );
                }
            };

            // Checked at construction too, but the key can disappear while
            // the daemon runs; without it every spawn is a guaranteed
            // BatchMode failure not worth a backoff sequence.
            if !self.ssh.identity_file.exists() {
                return context.failure(
                    source,
                    self.remote_root(),
                    self.method_name(),
                    0,
                    TransferError::IdentityFileMissing(self.ssh.identity_file.clone()).to_string(),
                );
            }

            let outcome = self
                .policy
                .execute_with_retry("ssh transfer", || {
                    self.attempt(source, &relative, file_size)
                })
                .await;

            match outcome {
                Ok(outcome) => {
                    let retries = outcome.retries();
                    let (destination, verified) = outcome.value;
                    if verified || !self.config.verify_transfer {
                        finalize_source(source, &relative, &self.config).await;
                        context.success(source, destination, self.method_name(), verified, retries)
                    } else {
                        // Unverified: report, but never archive or delete.
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
                        self.remote_target(&relative),
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
            let spec = self.ssh_spec("exit 0".into(), self.ssh.connect_timeout());
            match self.run_checked(&spec).await {
                Ok(_) => true,
                Err(error) => {
                    tracing::warn!(host = %self.ssh.host, error = %error, "ssh connection test failed");
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
            let remote = self.remote_size(destination).await?;
            Ok(local == remote)
        })
    }

    fn method_name(&self) -> &'static str {
        "ssh"
    }
}

/// Validation shared with the SMB transport: source policy plus destination
/// derivation.
pub(crate) fn prepare_source(
    source: &Path,
    config: &RelayConfig,
    file_size: u64,
    dest_override: Option<&Path>,
) -> Result<PathBuf, TransferError> {
    ferry_security::validate_source_file(source, file_size, &config.security)?;
    let relative = relative_destination(source, &config.watch_dir, dest_override)?;
    if let Some(name) = relative.file_name() {
        ferry_security::validate_filename(&name.to_string_lossy())?;
    }
    Ok(relative)
}

pub(crate) fn display_retry_error(error: &RetryError<TransferError>) -> String {
    error.to_string()
}

/// Translates Windows drive-letter paths for the remote side:
/// `F:\inbound` → `F:/inbound` when the remote server is Windows,
/// `/f/inbound` when it is Linux (MSYS-style root). Other paths only get
/// backslash normalization.
pub(crate) fn translate_remote_path(path: &str, remote_is_windows: bool) -> String {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let rest = path[2..].replace('\\', "/");
        if remote_is_windows {
            format!("{}:{rest}", bytes[0] as char)
        } else {
            let drive = bytes[0].to_ascii_lowercase() as char;
            if rest.starts_with('/') {
                format!("/{drive}{rest}")
            } else {
                format!("/{drive}/{rest}")
            }
        }
    } else {
        path.replace('\\', "/")
    }
}

/// Maps remote-tool stderr onto the error taxonomy. The fallback is the last
/// stderr line that is not a warning/debug diagnostic, truncated to 200
/// characters.
pub(crate) fn classify_tool_failure(program: &str, stderr: &str) -> TransferError {
    let lower = stderr.to_ascii_lowercase();

    if lower.contains("unprotected private key file") || lower.contains("bad permissions") {
        return TransferError::Auth("private key file permissions are too open".into());
    }
    if lower.contains("permission denied (publickey") {
        return TransferError::Auth("public key authentication rejected by the server".into());
    }
    if lower.contains("host key verification failed")
        || lower.contains("remote host identification has changed")
    {
        return TransferError::HostKey(
            "host key mismatch; remove the stale known_hosts entry if the host was reinstalled"
                .into(),
        );
    }
    if lower.contains("connection refused")
        || lower.contains("connection closed")
        || lower.contains("connection timed out")
        || lower.contains("could not resolve hostname")
        || lower.contains("network is unreachable")
    {
        return TransferError::Connection(last_meaningful_line(stderr));
    }
    if lower.contains("no such file or directory") {
        return TransferError::RemoteDirMissing(last_meaningful_line(stderr));
    }
    if lower.contains("no space left on device") || lower.contains("disk quota exceeded") {
        return TransferError::RemoteDiskFull(last_meaningful_line(stderr));
    }

    TransferError::CommandFailed {
        program: program.to_string(),
        detail: last_meaningful_line(stderr),
    }
}

fn last_meaningful_line(stderr: &str) -> String {
    let line = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            !lower.starts_with("warning:") && !lower.starts_with("debug")
        })
        .next_back()
        .unwrap_or("no diagnostic output");
    line.chars().take(200).collect()
}
