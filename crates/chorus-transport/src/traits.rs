//! Transport abstraction for push connections.
//!
//! A push session only needs to read client frames and write server frames;
//! any bidirectional channel that can do both implements [`Connection`].

use async_trait::async_trait;
use chorus_protocol::{ClientFrame, ProtocolError, ServerFrame};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection, used in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Self(format!("conn_{n:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// One inbound unit read from a connection.
#[derive(Debug)]
pub enum Inbound {
    /// A well-formed client frame.
    Frame(ClientFrame),
    /// Data that did not decode. The connection stays usable.
    Malformed(ProtocolError),
}

/// A long-lived bidirectional connection to one client.
///
/// `recv` must be cancel safe: the push session races it against outbound
/// deliveries and drops it when a delivery wins.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next inbound unit.
    ///
    /// Returns `Ok(None)` when the peer closed the connection.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;

    /// Send a frame to the client.
    async fn send(&mut self, frame: &ServerFrame) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }
}
