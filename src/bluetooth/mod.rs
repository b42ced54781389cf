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

//! Bluetooth communication module.
//!
//! Connection state machine, message transfer over RFCOMM streams, and the
//! discovery and pairing bookkeeping that feeds it.

mod adapter;
#[cfg(feature = "bluez")]
mod bluez;
mod connection;
mod discovery;
mod loopback;
mod manager;
mod monitor;
mod protocol;
mod registry;

pub use adapter::{
    AdapterEvent, BluetoothAdapter, BoxedStream, RfcommListener, RfcommStream, Subscription,
};
#[cfg(feature = "bluez")]
pub use bluez::BluezAdapter;
pub use connection::{
    ConnectionEvent, ConnectionState, MessageSender, MessageTransferChannel, READ_BUFFER_SIZE,
};
pub use discovery::DiscoveryController;
pub use loopback::{LoopbackAdapter, LoopbackRadio};
pub use manager::{ConnectionManager, CONNECTION_INTERRUPTED};
pub use monitor::{ConnectionStateMonitor, NON_PAIRED_LINK_ERROR};
pub use protocol::{Message, FRAME_SEPARATOR, SERVICE_UUID, UNKNOWN_SENDER_NAME};
pub use registry::{DeviceDescriptor, DeviceRegistry};
