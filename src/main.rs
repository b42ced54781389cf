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

//! Bluetooth Chat command-line client

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluetooth_chat::bluetooth::{
    BluezAdapter, ConnectionEvent, ConnectionManager, DeviceDescriptor,
};
use bluetooth_chat::config::Config;

#[derive(Parser)]
#[command(name = "bluetooth-chat", version, about = "Text chat over Bluetooth RFCOMM")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for a peer to connect, then chat
    Listen,
    /// Connect to a peer by address, then chat
    Connect {
        /// Peer address, e.g. 00:11:22:33:44:55
        address: String,
    },
    /// Scan for nearby devices
    Scan {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
    /// List paired devices
    Paired,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.logging.filter.parse()?),
        )
        .init();

    info!("Starting Bluetooth Chat v{}...", env!("CARGO_PKG_VERSION"));

    let adapter = Arc::new(BluezAdapter::new().await?);
    if let Some(name) = &config.bluetooth.device_name {
        adapter.set_name(name).await?;
    }

    let permissions = Arc::new(config.permissions.to_capabilities());
    let manager = ConnectionManager::new(adapter.clone(), permissions, &config.chat).await;

    match cli.command {
        Command::Paired => {
            for device in manager.registry().paired_devices() {
                println!("{}  {}", device.address, device.name);
            }
        }
        Command::Scan { seconds } => {
            manager.discovery().start().await;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => info!("Scan interrupted"),
            }
            manager.discovery().stop().await;

            for device in manager.registry().scanned_devices() {
                println!("{}  {}", device.address, device.name);
            }
        }
        Command::Listen => {
            if config.bluetooth.discoverable {
                adapter.set_discoverable(true).await?;
            }
            let events = manager.start_server().await?;
            info!("Waiting for a peer...");
            chat(&manager, events).await?;
        }
        Command::Connect { address } => {
            let device = manager
                .registry()
                .paired_devices()
                .into_iter()
                .find(|device| device.address.eq_ignore_ascii_case(&address))
                .unwrap_or_else(|| DeviceDescriptor::unnamed(address));
            info!("Connecting to {}...", device.name);
            let events = manager.connect_to(&device).await?;
            chat(&manager, events).await?;
        }
    }

    manager.release();
    info!("Bluetooth Chat stopped");
    Ok(())
}

/// Print incoming events and send each stdin line until the connection ends.
async fn chat(
    manager: &ConnectionManager,
    mut events: mpsc::Receiver<ConnectionEvent>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut errors = manager.errors();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Established) => {
                    println!("-- connected, type a message and press Enter");
                }
                Some(ConnectionEvent::MessageArrived(message)) => {
                    println!("{}: {}", message.sender_name, message.body);
                }
                Some(ConnectionEvent::Failed(reason)) => error!("{}", reason),
                None => {
                    info!("Connection ended");
                    break;
                }
            },
            line = lines.next_line() => match line? {
                Some(text) if text.trim().is_empty() => {}
                Some(text) => {
                    if manager.try_send_message(&text).await.is_none() {
                        warn!("Not connected, message dropped");
                    }
                }
                None => break,
            },
            Ok(reason) = errors.recv() => warn!("{}", reason),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}
