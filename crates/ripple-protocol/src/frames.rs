//! Frame types for the Ripple protocol.
//!
//! Frames are the unit of communication between a chat client and the
//! server. Each frame is serialized with MessagePack.

use serde::{Deserialize, Serialize};

/// Current protocol version, echoed back in [`Frame::Connected`].
pub const PROTOCOL_VERSION: u8 = 1;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Publish = 0x03,
    Message = 0x04,
    Ack = 0x05,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Publish),
            0x04 => Ok(FrameType::Message),
            0x05 => Ok(FrameType::Ack),
            0x06 => Ok(FrameType::Error),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
///
/// The server assigns every stored message a strictly increasing sequence
/// number (`seq`). Clients treat the highest `seq` they have seen as their
/// recovery cursor and present it in [`Frame::Connect`] on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Connection handshake. Must be the first frame a client sends.
    #[serde(rename = "connect")]
    Connect {
        /// Highest sequence number the client has already seen.
        /// Zero (the default) requests the full backlog.
        #[serde(default)]
        last_seen: u64,
        /// True when the transport resumed an existing session without
        /// losing events, so backlog replay can be skipped.
        #[serde(default)]
        resumed: bool,
    },

    /// Handshake reply. Sent before any replayed messages.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
    },

    /// Publish a chat message.
    #[serde(rename = "publish")]
    Publish {
        /// Message text.
        content: String,
        /// Client-generated idempotency key, stable across retries of the
        /// same logical message.
        client_offset: String,
    },

    /// A stored chat message, delivered live or during replay.
    #[serde(rename = "message")]
    Message {
        /// Message text.
        content: String,
        /// Server-assigned sequence number.
        seq: u64,
    },

    /// The publish identified by `client_offset` is durably stored.
    ///
    /// Also sent when a retried publish hits an already-stored offset, so a
    /// client that lost the first ack converges on resend.
    #[serde(rename = "ack")]
    Ack {
        /// Echoed idempotency key.
        client_offset: String,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Message { .. } => FrameType::Message,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(last_seen: u64) -> Self {
        Frame::Connect {
            last_seen,
            resumed: false,
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
        }
    }

    /// Create a new Publish frame.
    #[must_use]
    pub fn publish(content: impl Into<String>, client_offset: impl Into<String>) -> Self {
        Frame::Publish {
            content: content.into(),
            client_offset: client_offset.into(),
        }
    }

    /// Create a new Message frame.
    #[must_use]
    pub fn message(content: impl Into<String>, seq: u64) -> Self {
        Frame::Message {
            content: content.into(),
            seq,
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(client_offset: impl Into<String>) -> Self {
        Frame::Ack {
            client_offset: client_offset.into(),
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let connect = Frame::connect(42);
        assert_eq!(connect.frame_type(), FrameType::Connect);

        let publish = Frame::publish("hello", "offset-1");
        assert_eq!(publish.frame_type(), FrameType::Publish);

        let message = Frame::message("hello", 1);
        assert_eq!(message.frame_type(), FrameType::Message);
    }

    #[test]
    fn test_frame_type_conversion() {
        for raw in 0x01..=0x08u8 {
            let ft = FrameType::try_from(raw).unwrap();
            assert_eq!(u8::from(ft), raw);
        }
        assert!(FrameType::try_from(0x09).is_err());
    }

    #[test]
    fn test_connect_defaults() {
        // A bare connect deserializes with cursor 0 and no resume claim.
        let mut map = std::collections::BTreeMap::new();
        map.insert("type", "connect");
        let encoded = rmp_serde::to_vec_named(&map).unwrap();

        let frame: Frame = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(
            frame,
            Frame::Connect {
                last_seen: 0,
                resumed: false
            }
        );
    }
}
