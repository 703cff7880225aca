//! # ripple-protocol
//!
//! Wire protocol definitions for the Ripple broadcast chat server.
//!
//! This crate defines the binary protocol spoken between Ripple clients and
//! the server: frame types and the length-prefixed MessagePack codec.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - handshake, carrying the client's recovery cursor
//! - `Publish` - submit a chat message with an idempotency key
//! - `Message` - a stored message (live broadcast or backlog replay)
//! - `Ack` / `Error` - acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use ripple_protocol::{codec, Frame};
//!
//! let frame = Frame::publish("Hello, world!", "client-offset-1");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Frame, FrameType, PROTOCOL_VERSION};
