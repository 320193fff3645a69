// Host Registry and Credential Store
//
// Read-only lookups owned by the surrounding application. The engine never
// persists or logs credential material.

use crate::remote::identity::{AuthMethod, HostId, HostIdentity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registered host endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub address: String,
    pub port: u16,
    pub username: String,
    /// Starting directory for relative remote paths
    pub default_remote_path: Option<String>,
}

impl HostInfo {
    pub fn identity(&self) -> HostIdentity {
        HostIdentity::new(self.address.clone(), self.port, self.username.clone())
    }
}

/// Read-only lookup from host id to endpoint details
pub trait HostRegistry: Send + Sync {
    fn lookup(&self, host_id: &str) -> Option<HostInfo>;
}

/// Read-only lookup from host id to an authentication descriptor
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, host_id: &str) -> Option<AuthMethod>;
}

/// Map-backed registry, used by embedders with static host sets and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryHostRegistry {
    hosts: HashMap<HostId, HostInfo>,
}

impl InMemoryHostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host_id: impl Into<HostId>, info: HostInfo) {
        self.hosts.insert(host_id.into(), info);
    }
}

impl HostRegistry for InMemoryHostRegistry {
    fn lookup(&self, host_id: &str) -> Option<HostInfo> {
        self.hosts.get(host_id).cloned()
    }
}

/// Map-backed credential store
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    credentials: HashMap<HostId, AuthMethod>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host_id: impl Into<HostId>, auth: AuthMethod) {
        self.credentials.insert(host_id.into(), auth);
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(&self, host_id: &str) -> Option<AuthMethod> {
        self.credentials.get(host_id).cloned()
    }
}
