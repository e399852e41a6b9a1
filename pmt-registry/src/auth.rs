//! Registry authentication from the ambient container-tools environment.
//!
//! Credentials are read from the first auth file that exists:
//! `$REGISTRY_AUTH_JSON`, `$XDG_RUNTIME_DIR/containers/auth.json`, then
//! `~/.docker/config.json`. The tool only consumes the file; writing or
//! refreshing credentials is out of scope.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

use crate::error::RegistryError;

/// Environment variable pointing at the auth file.
pub const REGISTRY_AUTH_JSON_ENV: &str = "REGISTRY_AUTH_JSON";

#[derive(Debug, Default, Deserialize)]
struct AuthFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
}

/// Per-host Basic credentials loaded from the auth file.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    // host -> base64(user:pass), kept encoded for the Authorization header
    auths: HashMap<String, String>,
}

impl AuthConfig {
    /// Load credentials from the ambient environment. A missing auth file
    /// yields an anonymous configuration; a present but unreadable file is
    /// an error.
    pub fn from_env() -> Result<Self, RegistryError> {
        match auth_file_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("no registry auth file found; using anonymous access");
                Ok(Self::default())
            }
        }
    }

    fn from_file(path: &std::path::Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::AuthConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let file: AuthFile = serde_json::from_str(&content).map_err(|e| {
            RegistryError::AuthConfig(format!("cannot parse {}: {e}", path.display()))
        })?;
        let mut auths = HashMap::new();
        for (host, entry) in file.auths {
            let Some(encoded) = entry.auth else { continue };
            // Validate the encoding up front so a broken entry fails loudly
            // instead of producing 401s later.
            BASE64.decode(encoded.trim()).map_err(|e| {
                RegistryError::AuthConfig(format!("auth entry for {host} is not base64: {e}"))
            })?;
            auths.insert(host, encoded.trim().to_string());
        }
        debug!("loaded registry credentials for {} host(s)", auths.len());
        Ok(Self { auths })
    }

    /// `Authorization` header value for the given registry host, if the
    /// auth file carries an entry for it.
    pub fn header_for(&self, host: &str) -> Option<String> {
        self.auths.get(host).map(|encoded| format!("Basic {encoded}"))
    }
}

fn auth_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(REGISTRY_AUTH_JSON_ENV) {
        return Some(PathBuf::from(path));
    }
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        let candidate = PathBuf::from(runtime_dir).join("containers/auth.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".docker/config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loads_basic_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let encoded = BASE64.encode("user:secret");
        write!(
            file,
            r#"{{"auths": {{"quay.io": {{"auth": "{encoded}"}}}}}}"#
        )
        .unwrap();
        let config = AuthConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.header_for("quay.io"),
            Some(format!("Basic {encoded}"))
        );
        assert_eq!(config.header_for("ghcr.io"), None);
    }

    #[test]
    fn test_rejects_invalid_base64() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"auths": {{"quay.io": {{"auth": "%%%"}}}}}}"#).unwrap();
        assert!(AuthConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_entry_without_auth_field_is_anonymous() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"auths": {{"quay.io": {{}}}}}}"#).unwrap();
        let config = AuthConfig::from_file(file.path()).unwrap();
        assert_eq!(config.header_for("quay.io"), None);
    }
}
