//! Subprocess execution seam.
//!
//! All argument-vector construction lives with the transports; this module
//! only knows how to run an argv, capture output, and enforce a deadline by
//! killing the child. Tests inject a fake [`CommandRunner`] so nothing in
//! the transports ever spawns a real process under test.

use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use crate::error::TransferError;

/// One external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args,
            timeout,
        }
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code; `None` when the process died to a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs commands. Object-safe so tests can substitute a fake.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput, TransferError>> + Send + 'a>>;
}

/// Real runner backed by `tokio::process`.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run<'a>(
        &'a self,
        spec: &'a CommandSpec,
    ) -> Pin<Box<dyn Future<Output = Result<CommandOutput, TransferError>> + Send + 'a>> {
        Box::pin(async move {
            let mut command = tokio::process::Command::new(&spec.program);
            command
                .args(&spec.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                // The child must die with the future when the timeout fires.
                .kill_on_drop(true);

            let child = command.spawn().map_err(|source| TransferError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

            tracing::debug!(
                program = %spec.program,
                args = %redacted_args(&spec.args).join(" "),
                timeout_secs = spec.timeout.as_secs(),
                "running command"
            );

            match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => Ok(CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }),
                Ok(Err(source)) => Err(TransferError::Io(source)),
                Err(_) => Err(TransferError::Timeout {
                    program: spec.program.clone(),
                    seconds: spec.timeout.as_secs(),
                }),
            }
        })
    }
}

/// Copies the argv with any value following `-i` (the private key path)
/// replaced. Use this form, never the raw argv, in log output.
pub fn redacted_args(args: &[String]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            redacted.push("<redacted>".to_string());
            hide_next = false;
            continue;
        }
        if arg == "-i" {
            hide_next = true;
        }
        redacted.push(arg.clone());
    }
    redacted
}
