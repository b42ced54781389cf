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

//! Connection state machine for the listener and initiator roles.
//!
//! Only one connection, of either role, is active at a time. Every attempt
//! runs in its own task that owns an [`AttemptGuard`]; whichever way the task
//! ends (stream closed, connect error, receiver dropped, abort) the guard
//! closes the endpoints the attempt opened and returns the state to `Idle`.
//! Starting a new attempt closes the previous one first.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::adapter::{BluetoothAdapter, RfcommListener};
use super::connection::{ConnectionEvent, ConnectionState, MessageSender, MessageTransferChannel};
use super::discovery::DiscoveryController;
use super::monitor::ConnectionStateMonitor;
use super::protocol::{Message, SERVICE_UUID, UNKNOWN_SENDER_NAME};
use super::registry::{DeviceDescriptor, DeviceRegistry};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::permissions::{Capability, PermissionChecker};

/// Event reported when an outbound connect fails.
pub const CONNECTION_INTERRUPTED: &str = "Connection was interrupted";

/// An open listening or stream endpoint. Dropping it closes the endpoint.
struct Endpoint {
    _close: oneshot::Sender<()>,
}

/// Resolves once the matching [`Endpoint`] is dropped.
struct EndpointClosed(oneshot::Receiver<()>);

impl Endpoint {
    fn open() -> (Self, EndpointClosed) {
        let (tx, rx) = oneshot::channel();
        (Self { _close: tx }, EndpointClosed(rx))
    }
}

impl EndpointClosed {
    /// Must not be awaited again after it has completed.
    async fn wait(&mut self) {
        let _ = (&mut self.0).await;
    }
}

#[derive(Default)]
struct Endpoints {
    generation: u64,
    server: Option<Endpoint>,
    client: Option<Endpoint>,
    transfer: Option<MessageSender>,
    tasks: Vec<JoinHandle<()>>,
}

impl Endpoints {
    fn clear(&mut self) {
        self.server = None;
        self.client = None;
        self.transfer = None;
    }
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    endpoints: Mutex<Endpoints>,
}

impl Shared {
    /// Close whatever is open and start a new attempt in `state`.
    ///
    /// Returns the new generation and the tasks of earlier attempts, which the
    /// caller awaits so that their endpoints are released before new ones open.
    fn begin_attempt(
        &self,
        state: ConnectionState,
        server: Option<Endpoint>,
        client: Option<Endpoint>,
    ) -> (u64, Vec<JoinHandle<()>>) {
        let mut endpoints = self.endpoints.lock();
        if endpoints.server.is_some() || endpoints.client.is_some() {
            info!("Closing previous connection");
        }
        endpoints.clear();
        endpoints.generation += 1;
        endpoints.server = server;
        endpoints.client = client;
        self.state.send_replace(state);
        (endpoints.generation, std::mem::take(&mut endpoints.tasks))
    }

    fn track_task(&self, task: JoinHandle<()>) {
        let mut endpoints = self.endpoints.lock();
        endpoints.tasks.retain(|task| !task.is_finished());
        endpoints.tasks.push(task);
    }

    /// Move attempt `generation` to `Connected`.
    ///
    /// Closes the listening endpoint. Returns `false` if the attempt has been
    /// superseded or closed in the meantime.
    fn promote(&self, generation: u64, client: Option<Endpoint>, sender: MessageSender) -> bool {
        let mut endpoints = self.endpoints.lock();
        if endpoints.generation != generation {
            return false;
        }
        if let Some(client) = client {
            if endpoints.server.is_none() {
                return false;
            }
            endpoints.client = Some(client);
        } else if endpoints.client.is_none() {
            return false;
        }
        endpoints.server = None;
        endpoints.transfer = Some(sender);
        self.state.send_replace(ConnectionState::Connected);
        true
    }

    /// Clean up attempt `generation` if it is still the current one.
    fn finish_attempt(&self, generation: u64) {
        let mut endpoints = self.endpoints.lock();
        if endpoints.generation == generation {
            endpoints.clear();
            self.state.send_replace(ConnectionState::Idle);
        }
    }

    /// Close everything and retire the current attempt.
    fn close_all(&self) {
        let mut endpoints = self.endpoints.lock();
        endpoints.clear();
        endpoints.generation += 1;
        self.state.send_replace(ConnectionState::Idle);
    }

    fn transfer(&self) -> Option<MessageSender> {
        self.endpoints.lock().transfer.clone()
    }
}

/// Runs cleanup for one attempt when its task ends.
struct AttemptGuard {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.shared.finish_attempt(self.generation);
        debug!("Connection attempt {} finished", self.generation);
    }
}

/// Central connection state machine.
pub struct ConnectionManager {
    adapter: Arc<dyn BluetoothAdapter>,
    permissions: Arc<dyn PermissionChecker>,
    registry: Arc<DeviceRegistry>,
    discovery: DiscoveryController,
    monitor: ConnectionStateMonitor,
    shared: Arc<Shared>,
    event_buffer: usize,
}

impl ConnectionManager {
    /// Create a manager, load the paired set, and start watching link state.
    pub async fn new(
        adapter: Arc<dyn BluetoothAdapter>,
        permissions: Arc<dyn PermissionChecker>,
        config: &ChatConfig,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let discovery =
            DiscoveryController::new(adapter.clone(), permissions.clone(), registry.clone());
        let monitor = ConnectionStateMonitor::new(registry.clone(), config.error_buffer);

        discovery.refresh_paired().await;
        monitor.start(adapter.as_ref(), discovery.clone());

        Self {
            adapter,
            permissions,
            registry,
            discovery,
            monitor,
            shared: Arc::new(Shared {
                state: watch::channel(ConnectionState::Idle).0,
                endpoints: Mutex::new(Endpoints::default()),
            }),
            event_buffer: config.event_buffer.max(1),
        }
    }

    pub fn discovery(&self) -> &DiscoveryController {
        &self.discovery
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &ConnectionStateMonitor {
        &self.monitor
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.monitor.watch_connected()
    }

    pub fn errors(&self) -> broadcast::Receiver<String> {
        self.monitor.errors()
    }

    /// Whether a transfer channel is attached.
    pub fn has_transfer_channel(&self) -> bool {
        self.shared.endpoints.lock().transfer.is_some()
    }

    fn require_connect(&self) -> Result<()> {
        if self.permissions.can_connect() {
            Ok(())
        } else {
            warn!("Connect permission missing");
            Err(ChatError::PermissionDenied(Capability::Connect))
        }
    }

    /// Listen for one incoming peer.
    ///
    /// The returned receiver yields `Established` once a peer is accepted,
    /// then every message from it. It closes when the stream ends or the
    /// listening endpoint is closed; accept errors are not reported.
    pub async fn start_server(&self) -> Result<mpsc::Receiver<ConnectionEvent>> {
        self.require_connect()?;

        let (server_endpoint, server_closed) = Endpoint::open();
        let (generation, previous) =
            self.shared
                .begin_attempt(ConnectionState::Listening, Some(server_endpoint), None);
        let guard = AttemptGuard {
            shared: self.shared.clone(),
            generation,
        };
        for task in previous {
            let _ = task.await;
        }

        let listener = self
            .adapter
            .listen(SERVICE_UUID)
            .await
            .map_err(ChatError::Listen)?;
        info!("RFCOMM server listening for service {}", SERVICE_UUID);

        let (event_tx, event_rx) = mpsc::channel(self.event_buffer);
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            Self::accept_loop(listener, server_closed, shared, generation, event_tx).await;
        });
        self.shared.track_task(task);

        Ok(event_rx)
    }

    async fn accept_loop(
        mut listener: Box<dyn RfcommListener>,
        mut server_closed: EndpointClosed,
        shared: Arc<Shared>,
        generation: u64,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) {
        info!("Waiting for connections...");

        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("Accept loop ended: {}", e);
                    return;
                }
            },
            _ = server_closed.wait() => {
                debug!("Listening endpoint closed");
                return;
            }
            _ = event_tx.closed() => {
                debug!("Event receiver dropped while listening");
                return;
            }
        };
        // One peer per listening endpoint.
        drop(listener);
        info!("Peer connected");

        let channel = MessageTransferChannel::new(stream);
        let (client_endpoint, client_closed) = Endpoint::open();
        if !shared.promote(generation, Some(client_endpoint), channel.sender()) {
            return;
        }
        if event_tx.send(ConnectionEvent::Established).await.is_err() {
            return;
        }

        Self::transfer(channel, client_closed, event_tx).await;
    }

    /// Connect to `device` as the initiator.
    ///
    /// Stops discovery first. The returned receiver yields `Established` and
    /// the peer's messages, or exactly one `Failed` if the connect fails.
    pub async fn connect_to(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<mpsc::Receiver<ConnectionEvent>> {
        self.require_connect()?;

        let (client_endpoint, client_closed) = Endpoint::open();
        let (generation, previous) =
            self.shared
                .begin_attempt(ConnectionState::Connecting, None, Some(client_endpoint));
        let guard = AttemptGuard {
            shared: self.shared.clone(),
            generation,
        };
        for task in previous {
            let _ = task.await;
        }

        self.discovery.stop().await;

        let (event_tx, event_rx) = mpsc::channel(self.event_buffer);
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let address = device.address.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            Self::connect_loop(adapter, address, client_closed, shared, generation, event_tx).await;
        });
        self.shared.track_task(task);

        Ok(event_rx)
    }

    async fn connect_loop(
        adapter: Arc<dyn BluetoothAdapter>,
        address: String,
        mut client_closed: EndpointClosed,
        shared: Arc<Shared>,
        generation: u64,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) {
        info!("Connecting to {}", address);

        let connected = tokio::select! {
            result = adapter.connect(&address, SERVICE_UUID) => result,
            _ = client_closed.wait() => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "client endpoint closed",
            )),
            _ = event_tx.closed() => {
                debug!("Event receiver dropped while connecting");
                return;
            }
        };

        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Connection to {} failed: {}", address, e);
                shared.finish_attempt(generation);
                let _ = event_tx
                    .send(ConnectionEvent::Failed(CONNECTION_INTERRUPTED.to_string()))
                    .await;
                return;
            }
        };
        info!("Connected to {}", address);

        let channel = MessageTransferChannel::new(stream);
        if !shared.promote(generation, None, channel.sender()) {
            return;
        }
        if event_tx.send(ConnectionEvent::Established).await.is_err() {
            return;
        }

        Self::transfer(channel, client_closed, event_tx).await;
    }

    async fn transfer(
        channel: MessageTransferChannel,
        mut closed: EndpointClosed,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) {
        let receiver_gone = event_tx.clone();
        tokio::select! {
            result = channel.receive_loop(event_tx) => match result {
                Ok(()) => debug!("Event receiver dropped"),
                Err(e) => info!("Transfer ended: {}", e),
            },
            _ = closed.wait() => debug!("Stream endpoint closed"),
            _ = receiver_gone.closed() => debug!("Event receiver dropped"),
        }
    }

    /// Send `text` to the connected peer.
    ///
    /// Returns `None` when the connect capability is missing or no transfer
    /// channel is attached. Otherwise returns the sent message, even if the
    /// write itself failed; write failures are only logged.
    pub async fn try_send_message(&self, text: &str) -> Option<Message> {
        if !self.permissions.can_connect() {
            return None;
        }
        let sender = self.shared.transfer()?;

        let sender_name = self
            .adapter
            .local_name()
            .await
            .unwrap_or_else(|| UNKNOWN_SENDER_NAME.to_string());
        let message = Message::outgoing(sender_name, text);

        if !sender.send(&message.to_frame()).await {
            warn!("Message was not delivered to peer");
        }
        Some(message)
    }

    /// Close the listening and stream endpoints and return to `Idle`.
    pub fn close_connection(&self) {
        self.shared.close_all();
        debug!("Connection closed");
    }

    /// Tear down everything: notifications and any active connection.
    pub fn release(&self) {
        self.discovery.release();
        self.monitor.release();
        self.close_connection();
        info!("Connection manager released");
    }
}
