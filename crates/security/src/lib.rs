//! Path and endpoint validation.
//!
//! Everything here runs before a transfer is attempted and before any
//! external process is spawned. Failures are terminal for the file — the
//! retry layer never sees them.

use std::net::IpAddr;
use std::path::{Component, Path};

use ferry_config::SecurityLimits;

/// Rejection reasons. One variant per rule so callers and logs can tell
/// exactly which check fired.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("name is empty")]
    Empty,

    #[error("name contains a null byte")]
    NullByte,

    #[error("name is longer than 255 characters")]
    NameTooLong,

    #[error("path contains a parent directory component")]
    ParentTraversal,

    #[error("path is absolute or rooted")]
    Rooted,

    #[error("'{0}' is a reserved device name")]
    ReservedName(String),

    #[error("name contains forbidden character {0:?}")]
    ForbiddenCharacter(char),

    #[error("name ends with a dot or space")]
    TrailingDotOrSpace,

    #[error("hidden files are not allowed")]
    HiddenNotAllowed,

    #[error("extension '{0}' is on the executable denylist")]
    ExecutableExtension(String),

    #[error("file is {size} bytes, above the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },

    #[error("invalid hostname '{0}'")]
    InvalidHostname(String),

    #[error("invalid username '{0}'")]
    InvalidUsername(String),

    #[error("unsafe remote path: {0}")]
    UnsafeRemotePath(String),
}

/// Extensions refused unless executables are explicitly allowed. Matches the
/// set of types a mail gateway would strip: directly runnable or
/// script-host-interpreted on Windows.
const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "dll", "com", "scr", "pif", "bat", "cmd", "msi", "msp", "hta", "cpl", "jar", "vbs",
    "vbe", "js", "jse", "ws", "wsf", "wsh", "ps1", "reg", "lnk",
];

/// Names Windows reserves as devices regardless of extension.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Characters that are illegal in destination filenames or that would let a
/// name escape an argv word.
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\', '/'];

/// Validates a bare filename destined for the remote side.
pub fn validate_filename(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty);
    }
    if name.contains('\0') {
        return Err(ValidationError::NullByte);
    }
    if name.chars().count() > 255 {
        return Err(ValidationError::NameTooLong);
    }
    if name == "." || name == ".." {
        return Err(ValidationError::ParentTraversal);
    }
    for ch in name.chars() {
        if FORBIDDEN_CHARS.contains(&ch) || ch.is_control() {
            return Err(ValidationError::ForbiddenCharacter(ch));
        }
    }
    if name.ends_with('.') || name.ends_with(' ') {
        return Err(ValidationError::TrailingDotOrSpace);
    }
    let stem = name.split('.').next().unwrap_or(name);
    if RESERVED_NAMES
        .iter()
        .any(|reserved| stem.eq_ignore_ascii_case(reserved))
    {
        return Err(ValidationError::ReservedName(stem.to_string()));
    }
    Ok(())
}

/// Validates a relative path (the mirrored watch-directory suffix). Walks
/// components so `a/../b` is caught even though the string contains no bare
/// `..` token.
pub fn validate_relative_path(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::Empty);
    }
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                if part.contains('\0') {
                    return Err(ValidationError::NullByte);
                }
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(ValidationError::ParentTraversal),
            Component::RootDir | Component::Prefix(_) => return Err(ValidationError::Rooted),
        }
    }
    Ok(())
}

/// Applies size, extension, and hidden-file policy to a source file.
pub fn validate_source_file(
    path: &Path,
    size: u64,
    limits: &SecurityLimits,
) -> Result<(), ValidationError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or(ValidationError::Empty)?;

    if size > limits.max_file_size {
        return Err(ValidationError::FileTooLarge {
            size,
            max: limits.max_file_size,
        });
    }
    if !limits.allow_hidden && name.starts_with('.') {
        return Err(ValidationError::HiddenNotAllowed);
    }
    if !limits.allow_executable
        && let Some(ext) = path.extension()
    {
        let ext = ext.to_string_lossy().to_ascii_lowercase();
        if EXECUTABLE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ValidationError::ExecutableExtension(ext));
        }
    }
    Ok(())
}

/// Accepts a literal IP address or an RFC-1123 hostname: labels of 1–63
/// alphanumeric-or-hyphen characters, no leading/trailing hyphen, at most
/// 253 characters overall.
pub fn validate_hostname(host: &str) -> Result<(), ValidationError> {
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    let invalid = || ValidationError::InvalidHostname(host.to_string());
    if host.is_empty() || host.len() > 253 {
        return Err(invalid());
    }
    for label in host.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid());
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid());
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(invalid());
        }
    }
    Ok(())
}

/// SSH usernames: `[A-Za-z0-9._-]`, 1–32 characters.
pub fn validate_username(user: &str) -> Result<(), ValidationError> {
    let ok = !user.is_empty()
        && user.len() <= 32
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidUsername(user.to_string()))
    }
}

/// Remote destination paths end up inside a remote shell word, so beyond
/// traversal we refuse anything that could terminate the quoting.
pub fn validate_remote_path(path: &str) -> Result<(), ValidationError> {
    let unsafe_path = |reason: &str| ValidationError::UnsafeRemotePath(reason.to_string());
    if path.is_empty() {
        return Err(ValidationError::Empty);
    }
    if path.contains("..") {
        return Err(unsafe_path("contains '..'"));
    }
    if path.contains("//") {
        return Err(unsafe_path("contains '//'"));
    }
    if path.chars().any(|c| c.is_control()) {
        return Err(unsafe_path("contains control characters"));
    }
    if path.contains('\'') || path.contains('"') || path.contains('`') || path.contains('$') {
        return Err(unsafe_path("contains shell quoting characters"));
    }
    Ok(())
}
