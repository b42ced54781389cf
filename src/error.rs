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

//! Error types for the chat core.

use std::io;
use thiserror::Error;

use crate::permissions::Capability;

/// Errors surfaced by the connection operations.
///
/// Failures inside background loops never reach the caller as errors; they
/// end up as [`ConnectionEvent::Failed`](crate::bluetooth::ConnectionEvent)
/// or as a silently completed event sequence.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A required capability has not been granted.
    #[error("missing {0} permission")]
    PermissionDenied(Capability),

    /// The listening endpoint could not be opened.
    #[error("failed to open listening endpoint: {0}")]
    Listen(#[source] io::Error),

    /// Reading from an established stream failed.
    #[error("message transfer failed: {0}")]
    TransferFailed(#[source] io::Error),

    /// The peer closed the stream.
    #[error("stream closed by remote")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, ChatError>;
