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

//! Device discovery.

use parking_lot::Mutex;
use std::future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::adapter::{AdapterEvent, BluetoothAdapter, Subscription};
use super::registry::DeviceRegistry;
use crate::permissions::PermissionChecker;

/// Starts and stops scanning and feeds found devices into the registry.
#[derive(Clone)]
pub struct DiscoveryController {
    adapter: Arc<dyn BluetoothAdapter>,
    permissions: Arc<dyn PermissionChecker>,
    registry: Arc<DeviceRegistry>,
    found_devices: Arc<Mutex<Option<Subscription>>>,
}

impl DiscoveryController {
    pub fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        permissions: Arc<dyn PermissionChecker>,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            adapter,
            permissions,
            registry,
            found_devices: Arc::new(Mutex::new(None)),
        }
    }

    /// Start scanning. Does nothing without the scan capability.
    pub async fn start(&self) {
        if !self.permissions.can_scan() {
            debug!("Scan permission missing, not starting discovery");
            return;
        }

        {
            let mut found_devices = self.found_devices.lock();
            if found_devices.is_none() {
                let registry = self.registry.clone();
                *found_devices = Some(Subscription::spawn(
                    self.adapter.subscribe(),
                    move |event| {
                        if let AdapterEvent::DeviceFound(device) = event {
                            if registry.add_scanned(device.clone()) {
                                debug!("Found device {} ({})", device.name, device.address);
                            }
                        }
                        future::ready(())
                    },
                ));
            }
        }

        self.refresh_paired().await;

        match self.adapter.start_scan().await {
            Ok(()) => info!("Discovery started"),
            Err(e) => warn!("Failed to start discovery: {}", e),
        }
    }

    /// Cancel scanning. Does nothing without the scan capability.
    pub async fn stop(&self) {
        if !self.permissions.can_scan() {
            return;
        }

        match self.adapter.stop_scan().await {
            Ok(()) => debug!("Discovery stopped"),
            Err(e) => warn!("Failed to stop discovery: {}", e),
        }
    }

    /// Replace the paired set with the adapter's bonded devices.
    ///
    /// Requires the connect capability; silently skipped otherwise.
    pub async fn refresh_paired(&self) {
        if !self.permissions.can_connect() {
            return;
        }

        match self.adapter.bonded_devices().await {
            Ok(devices) => {
                debug!("{} paired devices", devices.len());
                self.registry.set_paired(devices);
            }
            Err(e) => warn!("Failed to query bonded devices: {}", e),
        }
    }

    /// Deregister the found-device handler.
    pub fn release(&self) {
        if self.found_devices.lock().take().is_some() {
            debug!("Found-device notifications released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::loopback::{LoopbackAdapter, LoopbackRadio};
    use crate::bluetooth::registry::DeviceDescriptor;
    use crate::permissions::{Capability, GrantedCapabilities};
    use std::time::Duration;
    use tokio::time::timeout;

    fn controller(
        perms: GrantedCapabilities,
    ) -> (Arc<LoopbackAdapter>, Arc<DeviceRegistry>, DiscoveryController) {
        let adapter = Arc::new(LoopbackRadio::new().adapter("00:00:00:00:00:01", None));
        let registry = Arc::new(DeviceRegistry::new());
        let discovery =
            DiscoveryController::new(adapter.clone(), Arc::new(perms), registry.clone());
        (adapter, registry, discovery)
    }

    #[tokio::test]
    async fn test_found_devices_are_registered_once() {
        let (adapter, registry, discovery) = controller(GrantedCapabilities::all());
        adapter.set_bonded(vec![DeviceDescriptor::new("Laptop", "AA")]);

        discovery.start().await;
        assert!(adapter.is_scanning());
        assert!(registry.is_paired("AA"));

        let mut scanned = registry.watch_scanned();
        adapter.notify_device_found(DeviceDescriptor::new("Phone", "01"));
        adapter.notify_device_found(DeviceDescriptor::new("Phone", "01"));
        adapter.notify_device_found(DeviceDescriptor::new("Tablet", "02"));

        timeout(Duration::from_secs(2), scanned.wait_for(|d| d.len() == 2))
            .await
            .unwrap()
            .unwrap();
        let names: Vec<_> = registry.scanned_devices().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["Phone", "Tablet"]);

        discovery.stop().await;
        assert!(!adapter.is_scanning());
    }

    #[tokio::test]
    async fn test_start_without_scan_permission_is_noop() {
        let (adapter, registry, discovery) =
            controller(GrantedCapabilities::new([Capability::Connect]));
        adapter.set_bonded(vec![DeviceDescriptor::new("Laptop", "AA")]);

        discovery.start().await;
        assert!(!adapter.is_scanning());
        assert!(registry.paired_devices().is_empty());
    }

    #[tokio::test]
    async fn test_release_stops_registering() {
        let (adapter, registry, discovery) = controller(GrantedCapabilities::all());
        discovery.start().await;
        discovery.release();
        discovery.release();

        adapter.notify_device_found(DeviceDescriptor::new("Phone", "01"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.scanned_devices().is_empty());
    }
}
