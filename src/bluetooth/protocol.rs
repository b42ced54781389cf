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

//! Chat message definition and wire framing.
//!
//! A frame is the UTF-8 text `<sender_name>#<body>` with no length prefix and
//! no escaping. Each read from the stream is taken to be exactly one frame.

use uuid::Uuid;

/// Service UUID that both peers register and connect to.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x27b7d1da_08c7_4505_a6d1_2459987e5e2d);

/// Separator between sender name and body.
pub const FRAME_SEPARATOR: char = '#';

/// Sender name used when the local adapter does not advertise one.
pub const UNKNOWN_SENDER_NAME: &str = "Unknown name";

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_name: String,
    pub body: String,
    pub is_from_local_user: bool,
}

impl Message {
    pub fn new(
        sender_name: impl Into<String>,
        body: impl Into<String>,
        is_from_local_user: bool,
    ) -> Self {
        Self {
            sender_name: sender_name.into(),
            body: body.into(),
            is_from_local_user,
        }
    }

    /// Create a message typed by the local user.
    pub fn outgoing(sender_name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(sender_name, body, true)
    }

    /// Encode to the wire frame.
    pub fn to_frame(&self) -> Vec<u8> {
        format!("{}{}{}", self.sender_name, FRAME_SEPARATOR, self.body).into_bytes()
    }

    /// Decode one frame.
    ///
    /// Splits at the last `#`. Invalid UTF-8 is replaced rather than rejected.
    /// Without any separator the whole text is used as both sender and body.
    pub fn from_frame(bytes: &[u8], is_from_local_user: bool) -> Self {
        let text = String::from_utf8_lossy(bytes);
        match text.rsplit_once(FRAME_SEPARATOR) {
            Some((sender_name, body)) => Self::new(sender_name, body, is_from_local_user),
            None => Self::new(text.as_ref(), text.as_ref(), is_from_local_user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let msg = Message::outgoing("alice", "hello");
        assert_eq!(msg.to_frame(), b"alice#hello".to_vec());
    }

    #[test]
    fn test_decode_marks_remote() {
        let msg = Message::from_frame(b"bob#hi there", false);
        assert_eq!(msg.sender_name, "bob");
        assert_eq!(msg.body, "hi there");
        assert!(!msg.is_from_local_user);
    }

    #[test]
    fn test_round_trip_drops_only_local_tag() {
        let cases = [("alice", "hello"), ("", ""), ("Pixel 7", "ünïcødé ✓"), ("x", " ")];
        for (name, body) in cases {
            let sent = Message::outgoing(name, body);
            let received = Message::from_frame(&sent.to_frame(), false);
            assert_eq!(received.sender_name, sent.sender_name);
            assert_eq!(received.body, sent.body);
            assert!(!received.is_from_local_user);
        }
    }

    #[test]
    fn test_split_uses_last_separator() {
        // A '#' in the sender name moves into the sender; a '#' in the body
        // splits the body instead. Both are known framing limitations.
        let msg = Message::from_frame(b"team#1#ready", false);
        assert_eq!(msg.sender_name, "team#1");
        assert_eq!(msg.body, "ready");

        let msg = Message::from_frame(b"carol#issue #42", false);
        assert_eq!(msg.sender_name, "carol#issue ");
        assert_eq!(msg.body, "42");
    }

    #[test]
    fn test_coalesced_reads_corrupt_framing() {
        // Two frames arriving in one read decode as a single message.
        let mut bytes = Message::outgoing("alice", "one").to_frame();
        bytes.extend(Message::outgoing("bob", "two").to_frame());

        let msg = Message::from_frame(&bytes, false);
        assert_eq!(msg.sender_name, "alice#onebob");
        assert_eq!(msg.body, "two");
    }

    #[test]
    fn test_missing_separator() {
        let msg = Message::from_frame(b"no separator", false);
        assert_eq!(msg.sender_name, "no separator");
        assert_eq!(msg.body, "no separator");
    }

    #[test]
    fn test_service_uuid() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "27b7d1da-08c7-4505-a6d1-2459987e5e2d"
        );
    }
}
