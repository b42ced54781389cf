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

//! Abstract Bluetooth adapter consumed by the chat core.

use async_trait::async_trait;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::registry::DeviceDescriptor;

/// A connected RFCOMM byte stream.
pub trait RfcommStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RfcommStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn RfcommStream>;

/// A listening endpoint. Dropping it closes the endpoint.
#[async_trait]
pub trait RfcommListener: Send {
    async fn accept(&mut self) -> io::Result<BoxedStream>;
}

/// Notifications pushed by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// A device was found while scanning.
    DeviceFound(DeviceDescriptor),
    /// The link to a peer went up or down.
    LinkStateChanged {
        connected: bool,
        peer: DeviceDescriptor,
    },
}

/// The local Bluetooth adapter.
#[async_trait]
pub trait BluetoothAdapter: Send + Sync + 'static {
    /// Open a listening endpoint for `service`.
    async fn listen(&self, service: Uuid) -> io::Result<Box<dyn RfcommListener>>;

    /// Open an outbound stream to `service` on the device at `address`.
    async fn connect(&self, address: &str, service: Uuid) -> io::Result<BoxedStream>;

    async fn start_scan(&self) -> io::Result<()>;

    async fn stop_scan(&self) -> io::Result<()>;

    /// Devices bonded with this adapter.
    async fn bonded_devices(&self) -> io::Result<Vec<DeviceDescriptor>>;

    /// Name the adapter advertises, if any.
    async fn local_name(&self) -> Option<String>;

    /// Subscribe to found-device and link-state notifications.
    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;
}

/// A registered notification handler. Dropping it deregisters the handler.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Run `handler` for every notification, one at a time, until the
    /// subscription is dropped.
    pub fn spawn<F, Fut>(mut events: broadcast::Receiver<AdapterEvent>, mut handler: F) -> Self
    where
        F: FnMut(AdapterEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => handler(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dropped {} adapter notifications", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
