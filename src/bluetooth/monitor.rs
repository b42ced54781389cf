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

//! Link-state monitoring.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use super::adapter::{AdapterEvent, BluetoothAdapter, Subscription};
use super::discovery::DiscoveryController;
use super::registry::{DeviceDescriptor, DeviceRegistry};

/// Published on the error stream when a non-paired peer reports a link change.
pub const NON_PAIRED_LINK_ERROR: &str = "cannot connect to a non-paired device";

#[derive(Clone)]
struct LinkStateHandler {
    registry: Arc<DeviceRegistry>,
    is_connected: Arc<watch::Sender<bool>>,
    errors: broadcast::Sender<String>,
}

impl LinkStateHandler {
    fn handle(&self, connected: bool, peer: &DeviceDescriptor) {
        if self.registry.is_paired(&peer.address) {
            debug!("Link to {} is {}", peer.address, if connected { "up" } else { "down" });
            self.is_connected.send_replace(connected);
        } else {
            warn!("Ignoring link-state change from non-paired device {}", peer.address);
            let _ = self.errors.send(NON_PAIRED_LINK_ERROR.to_string());
        }
    }
}

/// Tracks whether a paired peer is linked and reports unsolicited links.
pub struct ConnectionStateMonitor {
    handler: LinkStateHandler,
    subscription: Mutex<Option<Subscription>>,
}

impl ConnectionStateMonitor {
    pub fn new(registry: Arc<DeviceRegistry>, error_buffer: usize) -> Self {
        let (errors, _) = broadcast::channel(error_buffer.max(1));
        Self {
            handler: LinkStateHandler {
                registry,
                is_connected: Arc::new(watch::channel(false).0),
                errors,
            },
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe to the adapter's link-state notifications. Repeated calls are no-ops.
    ///
    /// The paired set is refreshed through `discovery` before each
    /// notification is judged, so devices bonded after startup are accepted.
    pub fn start(&self, adapter: &dyn BluetoothAdapter, discovery: DiscoveryController) {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return;
        }

        let handler = self.handler.clone();
        *subscription = Some(Subscription::spawn(adapter.subscribe(), move |event| {
            let handler = handler.clone();
            let discovery = discovery.clone();
            async move {
                if let AdapterEvent::LinkStateChanged { connected, peer } = event {
                    discovery.refresh_paired().await;
                    handler.handle(connected, &peer);
                }
            }
        }));
    }

    /// Apply one link-state notification against the current paired set.
    pub fn on_link_state_changed(&self, connected: bool, peer: &DeviceDescriptor) {
        self.handler.handle(connected, peer);
    }

    pub fn is_connected(&self) -> bool {
        *self.handler.is_connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.handler.is_connected.subscribe()
    }

    /// Subscribe to the error stream.
    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.handler.errors.subscribe()
    }

    pub fn release(&self) {
        self.subscription.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::loopback::{LoopbackAdapter, LoopbackRadio};
    use crate::permissions::GrantedCapabilities;
    use std::time::Duration;
    use tokio::time::timeout;

    fn paired_registry() -> Arc<DeviceRegistry> {
        let registry = Arc::new(DeviceRegistry::new());
        registry.set_paired(vec![DeviceDescriptor::new("Phone", "01")]);
        registry
    }

    #[test]
    fn test_paired_peer_updates_flag() {
        let monitor = ConnectionStateMonitor::new(paired_registry(), 4);
        let mut errors = monitor.errors();

        monitor.on_link_state_changed(true, &DeviceDescriptor::new("Phone", "01"));
        assert!(monitor.is_connected());

        monitor.on_link_state_changed(false, &DeviceDescriptor::new("Phone", "01"));
        assert!(!monitor.is_connected());
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_non_paired_peer_reports_error() {
        let monitor = ConnectionStateMonitor::new(paired_registry(), 4);
        let mut errors = monitor.errors();

        monitor.on_link_state_changed(true, &DeviceDescriptor::new("Stranger", "99"));

        assert!(!monitor.is_connected());
        assert_eq!(errors.try_recv().unwrap(), NON_PAIRED_LINK_ERROR);
        assert!(errors.try_recv().is_err());
    }

    fn started_monitor(
        bonded: Vec<DeviceDescriptor>,
    ) -> (Arc<LoopbackAdapter>, ConnectionStateMonitor) {
        let adapter = Arc::new(LoopbackRadio::new().adapter("00:00:00:00:00:01", None));
        adapter.set_bonded(bonded);
        let registry = Arc::new(DeviceRegistry::new());
        let discovery = DiscoveryController::new(
            adapter.clone(),
            Arc::new(GrantedCapabilities::all()),
            registry.clone(),
        );
        let monitor = ConnectionStateMonitor::new(registry, 4);
        monitor.start(adapter.as_ref(), discovery);
        (adapter, monitor)
    }

    #[tokio::test]
    async fn test_adapter_notifications_reach_monitor() {
        let (adapter, monitor) = started_monitor(vec![DeviceDescriptor::new("Phone", "01")]);
        let mut connected = monitor.watch_connected();
        let mut errors = monitor.errors();

        adapter.notify_link_state(true, DeviceDescriptor::new("Stranger", "99"));
        adapter.notify_link_state(true, DeviceDescriptor::new("Phone", "01"));

        let error = timeout(Duration::from_secs(2), errors.recv()).await.unwrap().unwrap();
        assert_eq!(error, NON_PAIRED_LINK_ERROR);
        timeout(Duration::from_secs(2), connected.wait_for(|c| *c))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_device_bonded_after_start_is_accepted() {
        let (adapter, monitor) = started_monitor(Vec::new());
        let mut connected = monitor.watch_connected();
        let mut errors = monitor.errors();

        adapter.set_bonded(vec![DeviceDescriptor::new("Phone", "01")]);
        adapter.notify_link_state(true, DeviceDescriptor::new("Phone", "01"));

        timeout(Duration::from_secs(2), connected.wait_for(|c| *c))
            .await
            .unwrap()
            .unwrap();
        assert!(errors.try_recv().is_err());
    }
}
