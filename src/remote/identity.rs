// Host Identity and Credentials

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Opaque host reference used by callers and the registry
pub type HostId = String;

/// Identity of a remote endpoint as seen by the session pool.
///
/// Two identities that differ only in credentials still hash to different
/// pool keys, so sessions authenticated differently are never shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostIdentity {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl HostIdentity {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }

    /// Display label, safe to log
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Authentication descriptor resolved from the credential store.
///
/// Secrets are never logged and never persisted by the engine; only the
/// fingerprint participates in pool keying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    Password { password: String },
    Key {
        key_path: PathBuf,
        passphrase: Option<String>,
    },
    Agent,
}

impl AuthMethod {
    /// Stable fingerprint of the credential material.
    ///
    /// Distinct credentials must never share a pool entry, so the full
    /// descriptor is hashed; the digest itself reveals nothing.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            AuthMethod::Password { password } => {
                hasher.update(b"password:");
                hasher.update(password.as_bytes());
            }
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                hasher.update(b"key:");
                hasher.update(key_path.to_string_lossy().as_bytes());
                if let Some(phrase) = passphrase {
                    hasher.update(b":");
                    hasher.update(phrase.as_bytes());
                }
            }
            AuthMethod::Agent => {
                hasher.update(b"agent");
            }
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

/// Key a pool entry is filed under: host identity plus credential fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential_fingerprint: String,
}

impl PoolKey {
    pub fn new(identity: &HostIdentity, auth: &AuthMethod) -> Self {
        Self {
            host: identity.host.clone(),
            port: identity.port,
            username: identity.username.clone(),
            credential_fingerprint: auth.fingerprint(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}
