// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Capability checks consumed from the environment.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A Bluetooth capability the host environment may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Discover nearby devices.
    Scan,
    /// Open and accept RFCOMM connections.
    Connect,
    /// Legacy admin-level access. Implies `Connect` on older stacks.
    Admin,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Connect => "connect",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers whether a capability is currently granted.
pub trait PermissionChecker: Send + Sync {
    fn has_capability(&self, capability: Capability) -> bool;

    /// Whether connections may be opened, listened for, or written to.
    fn can_connect(&self) -> bool {
        self.has_capability(Capability::Connect) || self.has_capability(Capability::Admin)
    }

    fn can_scan(&self) -> bool {
        self.has_capability(Capability::Scan)
    }
}

/// A mutable set of granted capabilities.
#[derive(Debug, Default)]
pub struct GrantedCapabilities {
    granted: RwLock<HashSet<Capability>>,
}

impl GrantedCapabilities {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            granted: RwLock::new(capabilities.into_iter().collect()),
        }
    }

    /// Every capability granted.
    pub fn all() -> Self {
        Self::new([Capability::Scan, Capability::Connect, Capability::Admin])
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn grant(&self, capability: Capability) {
        self.granted.write().insert(capability);
    }

    pub fn revoke(&self, capability: Capability) {
        self.granted.write().remove(&capability);
    }
}

impl PermissionChecker for GrantedCapabilities {
    fn has_capability(&self, capability: Capability) -> bool {
        self.granted.read().contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_implies_connect() {
        let perms = GrantedCapabilities::new([Capability::Admin]);
        assert!(perms.can_connect());
        assert!(!perms.can_scan());
    }

    #[test]
    fn test_grant_and_revoke() {
        let perms = GrantedCapabilities::none();
        assert!(!perms.can_connect());

        perms.grant(Capability::Connect);
        assert!(perms.can_connect());

        perms.revoke(Capability::Connect);
        assert!(!perms.has_capability(Capability::Connect));
    }
}
