//! Credential lookup seam.
//!
//! The relay never stores credentials; it asks a provider for them by key at
//! connection time. Encrypted storage lives with the hosting application.

use std::fmt;

/// Network credentials for an authenticated SMB connection.
#[derive(Clone)]
pub struct SmbCredentials {
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
}

impl SmbCredentials {
    /// `DOMAIN\user` or plain `user` for the connect command line.
    pub fn qualified_username(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{domain}\\{}", self.username),
            None => self.username.clone(),
        }
    }
}

// Passwords must never reach logs, including via {:?}.
impl fmt::Debug for SmbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Looks up SMB credentials by configuration key.
pub trait CredentialProvider: Send + Sync {
    /// Returns the credentials for `key`, or `None` when unknown.
    fn smb_credentials(&self, key: &str) -> Option<SmbCredentials>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let creds = SmbCredentials {
            username: "relay".into(),
            password: "hunter2".into(),
            domain: Some("CORP".into()),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn qualified_username_includes_domain() {
        let creds = SmbCredentials {
            username: "relay".into(),
            password: "x".into(),
            domain: Some("CORP".into()),
        };
        assert_eq!(creds.qualified_username(), "CORP\\relay");

        let plain = SmbCredentials {
            username: "relay".into(),
            password: "x".into(),
            domain: None,
        };
        assert_eq!(plain.qualified_username(), "relay");
    }
}
