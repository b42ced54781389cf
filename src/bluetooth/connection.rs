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

//! Established connection: lifecycle events and the message transfer channel.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use super::adapter::BoxedStream;
use super::protocol::Message;
use crate::error::{ChatError, Result};

/// Size of the buffer each read fills.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Events emitted for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The stream to the peer is up.
    Established,
    /// A message arrived from the peer.
    MessageArrived(Message),
    /// The attempt failed. Always the last event.
    Failed(String),
}

/// State of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Listening,
    Connecting,
    Connected,
}

/// Write side of a transfer channel.
#[derive(Clone)]
pub struct MessageSender {
    writer: Arc<Mutex<WriteHalf<BoxedStream>>>,
}

impl MessageSender {
    /// Write one frame. Failures are logged and reported as `false`.
    pub async fn send(&self, bytes: &[u8]) -> bool {
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                debug!("Sent {} bytes", bytes.len());
                true
            }
            Err(e) => {
                error!("Failed to send message: {}", e);
                false
            }
        }
    }
}

/// Owns one connected stream. Reads frames from it and writes frames to it.
pub struct MessageTransferChannel {
    reader: ReadHalf<BoxedStream>,
    sender: MessageSender,
}

impl MessageTransferChannel {
    pub fn new(stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            sender: MessageSender {
                writer: Arc::new(Mutex::new(writer)),
            },
        }
    }

    /// Handle for writing to this channel. Stays usable while the receive loop runs.
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    pub async fn send(&self, bytes: &[u8]) -> bool {
        self.sender.send(bytes).await
    }

    /// Read frames until the stream ends, emitting each as `MessageArrived`.
    ///
    /// Each read is decoded as exactly one frame. The loop always ends with an
    /// error: `StreamClosed` on EOF, `TransferFailed` on a read error. It returns
    /// `Ok` only when the event receiver has gone away.
    pub async fn receive_loop(mut self, events: mpsc::Sender<ConnectionEvent>) -> Result<()> {
        info!("Transfer channel started");
        let mut buffer = [0u8; READ_BUFFER_SIZE];

        loop {
            let n = match self.reader.read(&mut buffer).await {
                Ok(0) => {
                    info!("Connection closed by remote");
                    return Err(ChatError::StreamClosed);
                }
                Ok(n) => n,
                Err(e) => {
                    error!("Read error: {}", e);
                    return Err(ChatError::TransferFailed(e));
                }
            };

            let message = Message::from_frame(&buffer[..n], false);
            debug!("Received message from {}", message.sender_name);

            if events
                .send(ConnectionEvent::MessageArrived(message))
                .await
                .is_err()
            {
                debug!("Event receiver dropped, stopping transfer channel");
                return Ok(());
            }
        }
    }
}
