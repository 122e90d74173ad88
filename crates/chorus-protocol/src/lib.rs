//! # chorus-protocol
//!
//! Wire protocol for the Chorus push stream.
//!
//! A push connection exchanges tagged frames in either JSON text or
//! length-prefixed MessagePack binary form:
//!
//! - `submit` / `ping` - client to server
//! - `connected` / `message` / `ack` / `error` / `pong` - server to client
//!
//! ## Example
//!
//! ```rust
//! use chorus_protocol::{codec, ClientFrame, ServerFrame};
//!
//! let frame = codec::decode_client_json(r#"{"author":"alice","body":"hi"}"#).unwrap();
//! assert_eq!(frame, ClientFrame::submit("alice", "hi"));
//!
//! let encoded = codec::encode(&ServerFrame::message(1, "alice", "hi")).unwrap();
//! let decoded: ServerFrame = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.message_id(), Some(1));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{Encoding, ProtocolError};
pub use frames::{codes, ClientFrame, ServerFrame, PROTOCOL_VERSION};
