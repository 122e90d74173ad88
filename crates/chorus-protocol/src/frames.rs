//! Frame types for the Chorus push stream.
//!
//! A push connection carries [`ClientFrame`]s inbound and [`ServerFrame`]s
//! outbound. Both are internally tagged by a `type` field so the same
//! definitions serve the JSON text encoding and the MessagePack binary one.

use serde::{Deserialize, Serialize};

/// Current protocol version, announced in the `connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Error codes carried by [`ServerFrame::Error`].
pub mod codes {
    /// The frame could not be decoded.
    pub const INVALID_FRAME: u16 = 4000;
    /// The frame decoded but the submission failed validation.
    pub const INVALID_MESSAGE: u16 = 4001;
    /// The message could not be persisted and was not broadcast.
    pub const PERSISTENCE_FAILED: u16 = 5000;
    /// The broadcaster is no longer accepting submissions.
    pub const UNAVAILABLE: u16 = 5030;
}

/// A frame sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Submit a new chat message.
    Submit {
        /// Optional request ID; when present the server answers with
        /// `ack` or `error` carrying the same value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<u64>,
        /// Message author.
        #[serde(alias = "username")]
        author: String,
        /// Message text.
        #[serde(alias = "content")]
        body: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp, echoed back in the pong.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientFrame {
    /// Create a fire-and-forget submission.
    #[must_use]
    pub fn submit(author: impl Into<String>, body: impl Into<String>) -> Self {
        ClientFrame::Submit {
            request: None,
            author: author.into(),
            body: body.into(),
        }
    }

    /// Create a submission that asks for an acknowledgement.
    #[must_use]
    pub fn submit_with_ack(
        request: u64,
        author: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        ClientFrame::Submit {
            request: Some(request),
            author: author.into(),
            body: body.into(),
        }
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        ClientFrame::Ping { timestamp }
    }
}

/// An untagged submission, as sent by plain chat clients that only know the
/// message shape. Any `id` the client includes is ignored.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BareSubmission {
    #[serde(alias = "username")]
    pub author: String,
    #[serde(alias = "content")]
    pub body: String,
}

impl From<BareSubmission> for ClientFrame {
    fn from(bare: BareSubmission) -> Self {
        ClientFrame::submit(bare.author, bare.body)
    }
}

/// A frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every push connection.
    Connected {
        /// Registry identifier of this subscriber.
        subscriber: u64,
        /// Protocol version.
        version: u8,
        /// Watermark the replay starts after, if the client supplied one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        watermark: Option<u64>,
    },

    /// A persisted chat message, replayed or live.
    Message {
        /// Message ID.
        id: u64,
        /// Message author.
        author: String,
        /// Message text.
        body: String,
    },

    /// A submission was persisted and broadcast.
    Ack {
        /// Request ID from the submission.
        request: u64,
        /// ID assigned to the message.
        id: u64,
    },

    /// A request failed.
    Error {
        /// Request ID of the failed submission, if it carried one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<u64>,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable description.
        message: String,
    },

    /// Reply to a ping.
    Pong {
        /// Echoed timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerFrame {
    /// Create a connected frame.
    #[must_use]
    pub fn connected(subscriber: u64, watermark: Option<u64>) -> Self {
        ServerFrame::Connected {
            subscriber,
            version: PROTOCOL_VERSION,
            watermark,
        }
    }

    /// Create a message frame.
    #[must_use]
    pub fn message(id: u64, author: impl Into<String>, body: impl Into<String>) -> Self {
        ServerFrame::Message {
            id,
            author: author.into(),
            body: body.into(),
        }
    }

    /// Create an ack frame.
    #[must_use]
    pub fn ack(request: u64, id: u64) -> Self {
        ServerFrame::Ack { request, id }
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(request: Option<u64>, code: u16, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            request,
            code,
            message: message.into(),
        }
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        ServerFrame::Pong { timestamp }
    }

    /// The message ID, if this is a message frame.
    #[must_use]
    pub fn message_id(&self) -> Option<u64> {
        match self {
            ServerFrame::Message { id, .. } => Some(*id),
            _ => None,
        }
    }
}
