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

//! In-process adapter.
//!
//! Adapters attached to the same [`LoopbackRadio`] can listen for and connect
//! to each other by `(address, service)`. Streams are `tokio::io::duplex`
//! pipes. Notifications and the bonded set are driven by the caller.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::adapter::{AdapterEvent, BluetoothAdapter, BoxedStream, RfcommListener};
use super::registry::DeviceDescriptor;

const PIPE_CAPACITY: usize = 64 * 1024;

type Endpoint = (String, Uuid);

struct Registration {
    id: u64,
    incoming: mpsc::Sender<DuplexStream>,
}

/// Shared medium for loopback adapters.
#[derive(Clone, Default)]
pub struct LoopbackRadio {
    listeners: Arc<Mutex<HashMap<Endpoint, Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl LoopbackRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new adapter with the given address and advertised name.
    pub fn adapter(&self, address: impl Into<String>, name: Option<&str>) -> LoopbackAdapter {
        let (events, _) = broadcast::channel(64);
        LoopbackAdapter {
            radio: self.clone(),
            address: address.into(),
            name: name.map(str::to_string),
            bonded: Mutex::new(Vec::new()),
            events,
            scanning: AtomicBool::new(false),
        }
    }

    fn is_listening(&self, endpoint: &Endpoint) -> bool {
        self.listeners
            .lock()
            .get(endpoint)
            .is_some_and(|reg| !reg.incoming.is_closed())
    }
}

/// Adapter attached to a [`LoopbackRadio`].
pub struct LoopbackAdapter {
    radio: LoopbackRadio,
    address: String,
    name: Option<String>,
    bonded: Mutex<Vec<DeviceDescriptor>>,
    events: broadcast::Sender<AdapterEvent>,
    scanning: AtomicBool,
}

impl LoopbackAdapter {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Descriptor other adapters see for this one.
    pub fn descriptor(&self) -> DeviceDescriptor {
        match &self.name {
            Some(name) => DeviceDescriptor::new(name.clone(), self.address.clone()),
            None => DeviceDescriptor::unnamed(self.address.clone()),
        }
    }

    pub fn set_bonded(&self, devices: Vec<DeviceDescriptor>) {
        *self.bonded.lock() = devices;
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Whether a listening endpoint for `service` is open on this adapter.
    pub fn is_listening(&self, service: Uuid) -> bool {
        self.radio.is_listening(&(self.address.clone(), service))
    }

    /// Push a found-device notification.
    pub fn notify_device_found(&self, device: DeviceDescriptor) {
        let _ = self.events.send(AdapterEvent::DeviceFound(device));
    }

    /// Push a link-state notification.
    pub fn notify_link_state(&self, connected: bool, peer: DeviceDescriptor) {
        let _ = self
            .events
            .send(AdapterEvent::LinkStateChanged { connected, peer });
    }
}

struct LoopbackListener {
    radio: LoopbackRadio,
    endpoint: Endpoint,
    id: u64,
    incoming: mpsc::Receiver<DuplexStream>,
}

#[async_trait]
impl RfcommListener for LoopbackListener {
    async fn accept(&mut self) -> io::Result<BoxedStream> {
        match self.incoming.recv().await {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "listening endpoint closed",
            )),
        }
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        let mut listeners = self.radio.listeners.lock();
        if listeners
            .get(&self.endpoint)
            .is_some_and(|reg| reg.id == self.id)
        {
            listeners.remove(&self.endpoint);
        }
        debug!("Loopback listener {} closed", self.endpoint.0);
    }
}

#[async_trait]
impl BluetoothAdapter for LoopbackAdapter {
    async fn listen(&self, service: Uuid) -> io::Result<Box<dyn RfcommListener>> {
        let endpoint = (self.address.clone(), service);
        let mut listeners = self.radio.listeners.lock();
        if listeners
            .get(&endpoint)
            .is_some_and(|reg| !reg.incoming.is_closed())
        {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("service {} already registered", service),
            ));
        }

        let id = self.radio.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, incoming) = mpsc::channel(1);
        listeners.insert(endpoint.clone(), Registration { id, incoming: tx });
        Ok(Box::new(LoopbackListener {
            radio: self.radio.clone(),
            endpoint,
            id,
            incoming,
        }))
    }

    async fn connect(&self, address: &str, service: Uuid) -> io::Result<BoxedStream> {
        let target = self
            .radio
            .listeners
            .lock()
            .get(&(address.to_string(), service))
            .map(|reg| reg.incoming.clone());
        let refused = || {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no service {} at {}", service, address),
            )
        };

        let target = target.ok_or_else(refused)?;
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        target.send(remote).await.map_err(|_| refused())?;
        Ok(Box::new(local))
    }

    async fn start_scan(&self) -> io::Result<()> {
        self.scanning.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> io::Result<()> {
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn bonded_devices(&self) -> io::Result<Vec<DeviceDescriptor>> {
        Ok(self.bonded.lock().clone())
    }

    async fn local_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}
