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

//! BlueZ adapter built on `bluer`.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Address, Device, DeviceEvent, DeviceProperty, Session};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::adapter::{AdapterEvent, BluetoothAdapter, BoxedStream, RfcommListener};
use super::registry::DeviceDescriptor;

/// Service name registered in the SDP record.
const SERVICE_NAME: &str = "chat_service";

fn io_error(err: bluer::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

async fn describe(device: &Device) -> DeviceDescriptor {
    let address = device.address().to_string();
    match device.name().await {
        Ok(Some(name)) => DeviceDescriptor::new(name, address),
        _ => DeviceDescriptor::unnamed(address),
    }
}

/// Adapter backed by the default BlueZ controller.
pub struct BluezAdapter {
    session: Session,
    adapter: bluer::Adapter,
    events: broadcast::Sender<AdapterEvent>,
    scan: Mutex<Option<JoinHandle<()>>>,
    link_watch: JoinHandle<()>,
}

impl BluezAdapter {
    /// Open a BlueZ session on the default adapter and power it on.
    pub async fn new() -> anyhow::Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        let (events, _) = broadcast::channel(64);
        let link_watch = tokio::spawn(watch_links(adapter.clone(), events.clone()));

        Ok(Self {
            session,
            adapter,
            events,
            scan: Mutex::new(None),
            link_watch,
        })
    }

    /// Set the advertised device name.
    pub async fn set_name(&self, name: &str) -> anyhow::Result<()> {
        self.adapter.set_alias(name.to_string()).await?;
        info!("Bluetooth name set to: {}", name);
        Ok(())
    }

    pub async fn set_discoverable(&self, discoverable: bool) -> anyhow::Result<()> {
        self.adapter.set_discoverable(discoverable).await?;
        self.adapter.set_pairable(discoverable).await?;
        info!("Adapter discoverable: {}", discoverable);
        Ok(())
    }

    async fn register(&self, service: Uuid, role: Role) -> io::Result<ProfileHandle> {
        let profile = Profile {
            uuid: service,
            name: Some(SERVICE_NAME.to_string()),
            role: Some(role),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        self.session.register_profile(profile).await.map_err(io_error)
    }
}

impl Drop for BluezAdapter {
    fn drop(&mut self) {
        self.link_watch.abort();
        if let Some(scan) = self.scan.lock().take() {
            scan.abort();
        }
    }
}

/// One watcher task per device address.
struct DeviceWatchers {
    watched: HashSet<Address>,
    tasks: JoinSet<Address>,
}

impl DeviceWatchers {
    fn new() -> Self {
        Self {
            watched: HashSet::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Run `watcher` for `address` unless one is already running.
    fn spawn<F>(&mut self, address: Address, watcher: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        if !self.watched.insert(address) {
            return false;
        }
        self.tasks.spawn(async move {
            watcher.await;
            address
        });
        true
    }

    fn reap(&mut self) {
        while let Some(finished) = self.tasks.try_join_next() {
            match finished {
                Ok(address) => {
                    self.watched.remove(&address);
                }
                Err(e) => debug!("Device watcher failed: {}", e),
            }
        }
    }
}

/// Forward `Connected` property changes of every known device.
async fn watch_links(adapter: bluer::Adapter, events: broadcast::Sender<AdapterEvent>) {
    let adapter_events = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Link-state notifications unavailable: {}", e);
            return;
        }
    };
    pin_mut!(adapter_events);

    let mut watchers = DeviceWatchers::new();
    match adapter.device_addresses().await {
        Ok(addresses) => {
            for address in addresses {
                watch_device(&adapter, address, &events, &mut watchers);
            }
        }
        Err(e) => warn!("Failed to list devices: {}", e),
    }

    while let Some(event) = adapter_events.next().await {
        if let bluer::AdapterEvent::DeviceAdded(address) = event {
            watch_device(&adapter, address, &events, &mut watchers);
        }
    }
}

fn watch_device(
    adapter: &bluer::Adapter,
    address: Address,
    events: &broadcast::Sender<AdapterEvent>,
    watchers: &mut DeviceWatchers,
) {
    let Ok(device) = adapter.device(address) else {
        return;
    };
    let events = events.clone();
    watchers.spawn(address, async move {
        let changes = match device.events().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Cannot watch {}: {}", address, e);
                return;
            }
        };
        pin_mut!(changes);

        while let Some(change) = changes.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) = change {
                let peer = describe(&device).await;
                let _ = events.send(AdapterEvent::LinkStateChanged { connected, peer });
            }
        }
    });
}

struct BluezListener {
    profile: Pin<Box<ProfileHandle>>,
}

#[async_trait]
impl RfcommListener for BluezListener {
    async fn accept(&mut self) -> io::Result<BoxedStream> {
        let request = self.profile.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "profile unregistered")
        })?;
        info!("Connection from: {}", request.device());
        let stream = request.accept().map_err(io_error)?;
        Ok(Box::new(stream))
    }
}

pin_project! {
    /// Outbound stream that keeps its client profile registered.
    struct ProfileStream {
        #[pin]
        stream: Stream,
        profile: Pin<Box<ProfileHandle>>,
    }
}

impl AsyncRead for ProfileStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().stream.poll_read(cx, buf)
    }
}

impl AsyncWrite for ProfileStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_shutdown(cx)
    }
}

#[async_trait]
impl BluetoothAdapter for BluezAdapter {
    async fn listen(&self, service: Uuid) -> io::Result<Box<dyn RfcommListener>> {
        let profile = self.register(service, Role::Server).await?;
        info!("SPP service registered (UUID: {})", service);
        Ok(Box::new(BluezListener {
            profile: Box::pin(profile),
        }))
    }

    async fn connect(&self, address: &str, service: Uuid) -> io::Result<BoxedStream> {
        let address: Address = address.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid Bluetooth address: {}", address),
            )
        })?;
        let device = self.adapter.device(address).map_err(io_error)?;
        let mut profile = Box::pin(self.register(service, Role::Client).await?);

        let connect = async { device.connect_profile(&service).await.map_err(io_error) };
        let accept = async {
            let request = profile.next().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionAborted, "profile unregistered")
            })?;
            request.accept().map_err(io_error)
        };
        let ((), stream) = tokio::try_join!(connect, accept)?;

        Ok(Box::new(ProfileStream { stream, profile }))
    }

    async fn start_scan(&self) -> io::Result<()> {
        if self.scan.lock().is_some() {
            return Ok(());
        }

        let discovery = self.adapter.discover_devices().await.map_err(io_error)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            pin_mut!(discovery);
            while let Some(event) = discovery.next().await {
                if let bluer::AdapterEvent::DeviceAdded(address) = event {
                    if let Ok(device) = adapter.device(address) {
                        let _ = events.send(AdapterEvent::DeviceFound(describe(&device).await));
                    }
                }
            }
        });

        if let Some(previous) = self.scan.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> io::Result<()> {
        if let Some(scan) = self.scan.lock().take() {
            scan.abort();
        }
        Ok(())
    }

    async fn bonded_devices(&self) -> io::Result<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await.map_err(io_error)? {
            let device = self.adapter.device(addr).map_err(io_error)?;
            if device.is_paired().await.map_err(io_error)? {
                devices.push(describe(&device).await);
            }
        }

        Ok(devices)
    }

    async fn local_name(&self) -> Option<String> {
        self.adapter.alias().await.ok()
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}
