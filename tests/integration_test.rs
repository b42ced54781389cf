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

//! Integration tests for the full chat flow over the loopback radio.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use bluetooth_chat::bluetooth::{
    ConnectionEvent, ConnectionManager, ConnectionState, DeviceDescriptor, LoopbackAdapter,
    LoopbackRadio, Message, CONNECTION_INTERRUPTED, NON_PAIRED_LINK_ERROR,
};
use bluetooth_chat::config::Config;
use bluetooth_chat::permissions::{Capability, GrantedCapabilities};
use bluetooth_chat::ChatError;

const WAIT: Duration = Duration::from_secs(2);

async fn node(
    radio: &LoopbackRadio,
    address: &str,
    name: &str,
    config: &Config,
) -> (Arc<LoopbackAdapter>, ConnectionManager) {
    let adapter = Arc::new(radio.adapter(address, Some(name)));
    let permissions = Arc::new(config.permissions.to_capabilities());
    let manager = ConnectionManager::new(adapter.clone(), permissions, &config.chat).await;
    (adapter, manager)
}

async fn next(events: &mut mpsc::Receiver<ConnectionEvent>) -> Option<ConnectionEvent> {
    timeout(WAIT, events.recv()).await.expect("timed out waiting for event")
}

#[tokio::test]
async fn test_chat_session_both_directions() {
    let radio = LoopbackRadio::new();
    let config = Config::default();
    let (laptop_adapter, laptop) = node(&radio, "AA:AA:AA:AA:AA:01", "laptop", &config).await;
    let (_, phone) = node(&radio, "AA:AA:AA:AA:AA:02", "phone", &config).await;

    let mut laptop_events = laptop.start_server().await.unwrap();
    let mut phone_events = phone.connect_to(&laptop_adapter.descriptor()).await.unwrap();

    assert_eq!(next(&mut phone_events).await, Some(ConnectionEvent::Established));
    assert_eq!(next(&mut laptop_events).await, Some(ConnectionEvent::Established));

    for text in ["one", "two", "three"] {
        let sent = phone.try_send_message(text).await.unwrap();
        assert_eq!(sent, Message::new("phone", text, true));
        assert_eq!(
            next(&mut laptop_events).await,
            Some(ConnectionEvent::MessageArrived(Message::new("phone", text, false)))
        );
    }

    laptop.try_send_message("got them").await.unwrap();
    assert_eq!(
        next(&mut phone_events).await,
        Some(ConnectionEvent::MessageArrived(Message::new("laptop", "got them", false)))
    );

    phone.close_connection();
    assert_eq!(next(&mut phone_events).await, None);
    assert_eq!(next(&mut laptop_events).await, None);
    assert_eq!(phone.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_reconnect_after_session_ends() {
    let radio = LoopbackRadio::new();
    let config = Config::default();
    let (laptop_adapter, laptop) = node(&radio, "AA:AA:AA:AA:AA:01", "laptop", &config).await;
    let (_, phone) = node(&radio, "AA:AA:AA:AA:AA:02", "phone", &config).await;

    for round in 0..2 {
        let mut laptop_events = laptop.start_server().await.unwrap();
        let mut phone_events = phone.connect_to(&laptop_adapter.descriptor()).await.unwrap();
        assert_eq!(next(&mut laptop_events).await, Some(ConnectionEvent::Established));
        assert_eq!(next(&mut phone_events).await, Some(ConnectionEvent::Established));

        let text = format!("round {}", round);
        phone.try_send_message(&text).await.unwrap();
        assert_eq!(
            next(&mut laptop_events).await,
            Some(ConnectionEvent::MessageArrived(Message::new("phone", text, false)))
        );

        laptop.close_connection();
        assert_eq!(next(&mut laptop_events).await, None);
        assert_eq!(next(&mut phone_events).await, None);
    }
}

#[tokio::test]
async fn test_connect_to_absent_peer_fails_once() {
    let radio = LoopbackRadio::new();
    let (_, phone) = node(&radio, "AA:AA:AA:AA:AA:02", "phone", &Config::default()).await;

    let mut events = phone
        .connect_to(&DeviceDescriptor::new("laptop", "AA:AA:AA:AA:AA:01"))
        .await
        .unwrap();

    assert_eq!(
        next(&mut events).await,
        Some(ConnectionEvent::Failed(CONNECTION_INTERRUPTED.to_string()))
    );
    assert_eq!(next(&mut events).await, None);
    assert!(phone.try_send_message("lost").await.is_none());
}

#[tokio::test]
async fn test_discovery_fills_registry() {
    let radio = LoopbackRadio::new();
    let (adapter, phone) = node(&radio, "AA:AA:AA:AA:AA:02", "phone", &Config::default()).await;
    let mut scanned = phone.registry().watch_scanned();

    phone.discovery().start().await;
    assert!(adapter.is_scanning());

    adapter.notify_device_found(DeviceDescriptor::new("laptop", "AA:AA:AA:AA:AA:01"));
    adapter.notify_device_found(DeviceDescriptor::unnamed("AA:AA:AA:AA:AA:03"));
    adapter.notify_device_found(DeviceDescriptor::new("laptop", "AA:AA:AA:AA:AA:01"));

    timeout(WAIT, scanned.wait_for(|devices| devices.len() == 2))
        .await
        .unwrap()
        .unwrap();

    phone.discovery().stop().await;
    assert!(!adapter.is_scanning());
    assert_eq!(phone.registry().scanned_devices().len(), 2);
}

#[tokio::test]
async fn test_link_from_unpaired_device_is_reported() {
    let radio = LoopbackRadio::new();
    let adapter = Arc::new(radio.adapter("AA:AA:AA:AA:AA:01", Some("laptop")));
    adapter.set_bonded(vec![DeviceDescriptor::new("phone", "AA:AA:AA:AA:AA:02")]);
    let manager = ConnectionManager::new(
        adapter.clone(),
        Arc::new(GrantedCapabilities::all()),
        &Config::default().chat,
    )
    .await;
    let mut errors = manager.errors();
    let mut connected = manager.watch_connected();

    adapter.notify_link_state(true, DeviceDescriptor::new("phone", "AA:AA:AA:AA:AA:02"));
    timeout(WAIT, connected.wait_for(|c| *c)).await.unwrap().unwrap();

    adapter.notify_link_state(true, DeviceDescriptor::unnamed("AA:AA:AA:AA:AA:09"));
    let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert_eq!(error, NON_PAIRED_LINK_ERROR);
}

#[tokio::test]
async fn test_configured_permissions_gate_connections() {
    let radio = LoopbackRadio::new();
    let config = Config::from_toml_str(
        r#"
[permissions]
granted = ["scan"]
"#,
    )
    .unwrap();
    let (_, phone) = node(&radio, "AA:AA:AA:AA:AA:02", "phone", &config).await;

    let result = phone.start_server().await;
    assert!(matches!(result, Err(ChatError::PermissionDenied(Capability::Connect))));

    let result = phone
        .connect_to(&DeviceDescriptor::new("laptop", "AA:AA:AA:AA:AA:01"))
        .await;
    assert!(matches!(result, Err(ChatError::PermissionDenied(Capability::Connect))));
    assert_eq!(phone.state(), ConnectionState::Idle);
}
