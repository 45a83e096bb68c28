//! Configuration loading and the environment-backed credential provider.

use std::path::Path;

use anyhow::Context;
use ferry_config::{CredentialProvider, RelayConfig, SmbCredentials};

/// Reads and validates the relay configuration from a JSON file.
pub fn load(path: &Path) -> anyhow::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: RelayConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Resolves SMB credentials from the environment:
/// `FERRY_SMB_<KEY>_USERNAME`, `..._PASSWORD`, and optional `..._DOMAIN`,
/// where `<KEY>` is the configured credential key uppercased with `-`
/// replaced by `_`.
pub struct EnvCredentials;

impl EnvCredentials {
    fn var(key: &str, field: &str) -> Option<String> {
        let slug = key.to_ascii_uppercase().replace('-', "_");
        std::env::var(format!("FERRY_SMB_{slug}_{field}")).ok()
    }
}

impl CredentialProvider for EnvCredentials {
    fn smb_credentials(&self, key: &str) -> Option<SmbCredentials> {
        let username = Self::var(key, "USERNAME")?;
        let password = Self::var(key, "PASSWORD")?;
        Some(SmbCredentials {
            username,
            password,
            domain: Self::var(key, "DOMAIN"),
        })
    }
}
