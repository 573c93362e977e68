//! Host and operator inventory entries

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A host as declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    /// Stable identifier referenced by the API
    pub id: String,

    /// Human-readable name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,

    /// Hostname or IP address
    pub address: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    /// Password authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Private key authentication (takes precedence over password)
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Passphrase for the private key
    #[serde(default)]
    pub passphrase: Option<String>,

    /// Operator owning this host
    pub owner: String,

    /// Pinned host key fingerprint (`SHA256:...`)
    #[serde(default)]
    pub host_key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl HostEntry {
    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Expand a leading `~` in the key path
    pub fn resolved_key_path(&self) -> Option<PathBuf> {
        let path = self.key_path.as_ref()?;
        match path.strip_prefix("~") {
            Ok(rest) => Some(dirs::home_dir().unwrap_or_default().join(rest)),
            Err(_) => Some(path.clone()),
        }
    }
}

/// An operator allowed to use the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorEntry {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Hex-encoded SHA-256 digest of the operator's bearer token
    pub token_sha256: String,

    /// Elevated operators may access every host
    #[serde(default)]
    pub elevated: bool,
}
