//! # chorus-transport
//!
//! Transport adapters that connect clients to the Chorus hub.
//!
//! - **Push** - one long-lived bidirectional connection per subscriber;
//!   replays the backlog, then streams live messages and accepts submissions
//! - **Pull** - one bounded-wait request per delivery
//!
//! Push sessions are written against the [`Connection`] trait, so any
//! bidirectional transport can carry them. A WebSocket implementation on
//! top of axum is provided behind the `websocket` feature.
//!
//! ```rust,ignore
//! use chorus_transport::{PushSession, WebSocketConnection};
//!
//! async fn on_upgrade(hub: Hub, socket: WebSocket) {
//!     let conn = WebSocketConnection::new(socket, Encoding::Json, None, 64 * 1024);
//!     PushSession::new(hub, conn, None).run().await;
//! }
//! ```

pub mod pull;
pub mod push;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use pull::{poll, PollOutcome};
pub use push::{CloseReason, PushSession};
pub use traits::{Connection, ConnectionId, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
