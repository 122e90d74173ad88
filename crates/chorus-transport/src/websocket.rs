//! WebSocket connection backed by an upgraded axum socket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::BytesMut;
use chorus_protocol::{codec, ClientFrame, Encoding, ProtocolError, ServerFrame};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, Inbound, TransportError};

/// A push connection over an axum WebSocket.
///
/// Text messages carry JSON frames. Binary messages carry length-prefixed
/// MessagePack frames, possibly split across or packed into several
/// WebSocket messages.
pub struct WebSocketConnection {
    id: ConnectionId,
    socket: WebSocket,
    encoding: Encoding,
    remote_addr: Option<SocketAddr>,
    read_buffer: BytesMut,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket. Outbound frames use `encoding`.
    #[must_use]
    pub fn new(
        socket: WebSocket,
        encoding: Encoding,
        remote_addr: Option<SocketAddr>,
        max_message_size: usize,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            encoding,
            remote_addr,
            read_buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    fn decode_buffered(&mut self) -> Option<Inbound> {
        match codec::decode_from::<ClientFrame>(&mut self.read_buffer) {
            Ok(Some(frame)) => Some(Inbound::Frame(frame)),
            Ok(None) => None,
            Err(e) => {
                // Framing is lost; discard what is buffered and resync on the next message
                self.read_buffer.clear();
                Some(Inbound::Malformed(e))
            }
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        if let Some(inbound) = self.decode_buffered() {
            return Ok(Some(inbound));
        }

        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.max_message_size {
                        warn!(connection = %self.id, size = text.len(), "Text frame too large");
                        return Ok(Some(Inbound::Malformed(ProtocolError::FrameTooLarge(
                            text.len(),
                        ))));
                    }
                    return Ok(Some(match codec::decode_client_json(&text) {
                        Ok(frame) => Inbound::Frame(frame),
                        Err(e) => Inbound::Malformed(e),
                    }));
                }
                Some(Ok(Message::Binary(data))) => {
                    if self.read_buffer.len() + data.len() > self.max_message_size {
                        warn!(connection = %self.id, size = data.len(), "Binary frame too large");
                        self.read_buffer.clear();
                        return Ok(Some(Inbound::Malformed(ProtocolError::FrameTooLarge(
                            data.len(),
                        ))));
                    }
                    self.read_buffer.extend_from_slice(&data);
                    if let Some(inbound) = self.decode_buffered() {
                        return Ok(Some(inbound));
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Pongs are answered by the WebSocket layer
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, frame: &ServerFrame) -> Result<(), TransportError> {
        let message = match self.encoding {
            Encoding::Json => Message::Text(codec::encode_json(frame)?),
            Encoding::MessagePack => Message::Binary(codec::encode(frame)?.to_vec()),
        };
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}
