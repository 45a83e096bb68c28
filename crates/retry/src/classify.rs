//! Failure classification for I/O and OS network errors.
//!
//! The network code tables encode operational knowledge: conditions that
//! clear on their own get retried; authentication and authorization
//! conditions never do, because hammering a bad credential can lock the
//! relay's service account out of the destination entirely.
//!
//! Raw OS codes mean different things per platform: the Windows network
//! status table only applies on Windows hosts, and POSIX errnos only
//! elsewhere. Code 5 is `ERROR_ACCESS_DENIED` on Windows but `EIO` on
//! Linux, so a shared table would turn a transient I/O hiccup into a
//! permanent failure.

use std::io;

/// Windows network status codes that indicate a transient condition.
const TRANSIENT_OS_CODES: &[i32] = &[
    52,   // ERROR_DUP_NAME — duplicate name on the network
    53,   // ERROR_BAD_NETPATH — network path not found
    65,   // ERROR_NETWORK_ACCESS_DENIED — remote share refused, often mid-failover
    67,   // ERROR_BAD_NET_NAME — network name not found
    121,  // ERROR_SEM_TIMEOUT — semaphore timeout
    1220, // ERROR_REMOTE_SESSION_LIMIT_EXCEEDED
    1231, // ERROR_NETWORK_UNREACHABLE — location unavailable
    1311, // ERROR_NO_LOGON_SERVERS
];

/// Codes where a retry cannot succeed and may trigger account lockout.
const PERMANENT_OS_CODES: &[i32] = &[
    5,    // ERROR_ACCESS_DENIED
    86,   // ERROR_INVALID_PASSWORD
    1219, // ERROR_SESSION_CREDENTIAL_CONFLICT — multiple connections to a share
    1326, // ERROR_LOGON_FAILURE — bad username or password
    1330, // ERROR_PASSWORD_EXPIRED
    1331, // ERROR_ACCOUNT_DISABLED
    1909, // ERROR_ACCOUNT_LOCKED_OUT
];

/// POSIX errno values treated as transient for parity with the Windows
/// table (connection and reachability failures).
const TRANSIENT_ERRNOS: &[i32] = &[
    110, // ETIMEDOUT
    111, // ECONNREFUSED
    112, // EHOSTDOWN
    113, // EHOSTUNREACH
    101, // ENETUNREACH
    104, // ECONNRESET
];

/// Classifies a Windows network status code. `None` when the code is in
/// neither table.
pub fn windows_code_retryable(code: i32) -> Option<bool> {
    if TRANSIENT_OS_CODES.contains(&code) {
        Some(true)
    } else if PERMANENT_OS_CODES.contains(&code) {
        Some(false)
    } else {
        None
    }
}

/// Classifies a POSIX errno. There is no permanent table here: auth
/// failures on Unix surface through tool stderr, not errno.
pub fn errno_retryable(code: i32) -> Option<bool> {
    if TRANSIENT_ERRNOS.contains(&code) {
        Some(true)
    } else {
        None
    }
}

/// Classifies a raw OS error code for the host platform. `None` when the
/// code is unlisted and the caller should fall back to kind-based
/// classification.
pub fn os_error_retryable(code: i32) -> Option<bool> {
    if cfg!(windows) {
        windows_code_retryable(code)
    } else {
        errno_retryable(code)
    }
}

/// Classifies an [`io::Error`]:
/// - not-found is permanent (the file is gone, waiting will not bring it
///   back);
/// - permission-denied is retryable (transient share/ACL propagation is the
///   common cause in the field, unlike an OS logon failure);
/// - anything else defers to the platform code table, defaulting to
///   retryable.
pub fn io_error_retryable(error: &io::Error) -> bool {
    if let Some(code) = error.raw_os_error()
        && let Some(verdict) = os_error_retryable(code)
    {
        return verdict;
    }
    match error.kind() {
        io::ErrorKind::NotFound => false,
        io::ErrorKind::PermissionDenied => true,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_network_codes_retry() {
        for &code in &[52, 53, 65, 67, 121, 1220, 1231, 1311] {
            assert_eq!(windows_code_retryable(code), Some(true), "code {code}");
        }
    }

    #[test]
    fn auth_codes_never_retry() {
        for &code in &[5, 86, 1219, 1326, 1330, 1331, 1909] {
            assert_eq!(windows_code_retryable(code), Some(false), "code {code}");
        }
    }

    #[test]
    fn connection_errnos_retry() {
        for &code in &[101, 104, 110, 111, 112, 113] {
            assert_eq!(errno_retryable(code), Some(true), "errno {code}");
        }
    }

    #[test]
    fn unknown_codes_defer() {
        assert_eq!(os_error_retryable(424242), None);
    }

    #[cfg(unix)]
    #[test]
    fn unix_code_five_is_eio_not_access_denied() {
        // On Unix raw code 5 is EIO, a transient I/O failure; only the
        // Windows table maps 5 to an access-denied condition.
        let err = io::Error::from_raw_os_error(5);
        assert!(io_error_retryable(&err));
    }

    #[cfg(windows)]
    #[test]
    fn windows_code_five_is_access_denied() {
        let err = io::Error::from_raw_os_error(5);
        assert!(!io_error_retryable(&err));
    }

    #[test]
    fn not_found_is_permanent() {
        let err = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert!(!io_error_retryable(&err));
    }

    #[test]
    fn permission_denied_is_retryable() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "acl");
        assert!(io_error_retryable(&err));
    }

    #[test]
    fn generic_io_defaults_to_retryable() {
        let err = io::Error::new(io::ErrorKind::Other, "flaky");
        assert!(io_error_retryable(&err));
    }
}
