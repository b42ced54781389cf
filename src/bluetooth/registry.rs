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

//! Registry of scanned and paired devices.

use std::hash::{Hash, Hasher};
use tokio::sync::watch;

/// A remote device, identified by its hardware address.
#[derive(Debug, Clone, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub address: String,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Descriptor for a device that reported no name.
    pub fn unnamed(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address,
        }
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Scanned and paired device sets, each published as a snapshot.
#[derive(Debug)]
pub struct DeviceRegistry {
    scanned: watch::Sender<Vec<DeviceDescriptor>>,
    paired: watch::Sender<Vec<DeviceDescriptor>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self {
            scanned: watch::channel(Vec::new()).0,
            paired: watch::channel(Vec::new()).0,
        }
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a scanned device unless its address is already known.
    ///
    /// Returns `true` if the device was new.
    pub fn add_scanned(&self, device: DeviceDescriptor) -> bool {
        self.scanned.send_if_modified(|devices| {
            if devices.contains(&device) {
                false
            } else {
                devices.push(device);
                true
            }
        })
    }

    /// Replace the paired set.
    pub fn set_paired(&self, devices: Vec<DeviceDescriptor>) {
        self.paired.send_replace(devices);
    }

    pub fn scanned_devices(&self) -> Vec<DeviceDescriptor> {
        self.scanned.borrow().clone()
    }

    pub fn paired_devices(&self) -> Vec<DeviceDescriptor> {
        self.paired.borrow().clone()
    }

    pub fn is_paired(&self, address: &str) -> bool {
        self.paired.borrow().iter().any(|d| d.address == address)
    }

    pub fn watch_scanned(&self) -> watch::Receiver<Vec<DeviceDescriptor>> {
        self.scanned.subscribe()
    }

    pub fn watch_paired(&self) -> watch::Receiver<Vec<DeviceDescriptor>> {
        self.paired.subscribe()
    }
}
