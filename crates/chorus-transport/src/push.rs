//! Push transport adapter.
//!
//! One [`PushSession`] per long-lived connection. The session registers a
//! buffered subscriber, replays the backlog above the client's watermark,
//! then concurrently forwards live broadcasts and submits inbound messages.

use chorus_core::{AckResult, Hub, Message, MessageId, NewMessage, SubmitError, SubscriberId};
use chorus_protocol::{codes, ClientFrame, ServerFrame};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::traits::{Connection, Inbound, TransportError};

/// Why a push session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection.
    PeerClosed,
    /// Reading from or writing to the connection failed.
    TransportFailed,
    /// The broadcaster dropped this subscriber for falling behind.
    Dropped,
    /// The backlog could not be loaded.
    ReplayFailed,
    /// The server is shutting down or the broadcaster stopped.
    Shutdown,
}

impl CloseReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::TransportFailed => "transport_failed",
            Self::Dropped => "dropped",
            Self::ReplayFailed => "replay_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// What the session does after handling one inbound frame.
enum Step {
    Continue,
    AwaitAck(u64, oneshot::Receiver<AckResult>),
    Close(CloseReason),
}

/// Drives one push connection from connect to close.
pub struct PushSession<C> {
    hub: Hub,
    conn: C,
    watermark: Option<MessageId>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<C: Connection> PushSession<C> {
    /// Create a session. `watermark` is the highest message ID the client
    /// already has; `None` replays the full history.
    #[must_use]
    pub fn new(hub: Hub, conn: C, watermark: Option<MessageId>) -> Self {
        Self {
            hub,
            conn,
            watermark,
            shutdown: None,
        }
    }

    /// End the session with [`CloseReason::Shutdown`] once `shutdown`
    /// becomes `true`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run the session until the connection ends.
    ///
    /// The subscriber is unregistered and the connection closed on every
    /// exit path.
    pub async fn run(mut self) -> CloseReason {
        let (guard, mut deliveries) = self
            .hub
            .registry()
            .subscribe_push(self.hub.config().push_buffer, self.watermark);
        let subscriber = guard.id();

        info!(
            connection = %self.conn.id(),
            subscriber,
            watermark = ?self.watermark,
            remote = ?self.conn.remote_addr(),
            "Push session started"
        );

        let reason = match self.serve(subscriber, &mut deliveries).await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(connection = %self.conn.id(), subscriber, error = %e, "Push transport error");
                CloseReason::TransportFailed
            }
        };

        drop(guard);
        if reason != CloseReason::TransportFailed {
            let _ = self.conn.close().await;
        }

        info!(connection = %self.conn.id(), subscriber, reason = ?reason, "Push session ended");
        reason
    }

    async fn serve(
        &mut self,
        subscriber: SubscriberId,
        deliveries: &mut mpsc::Receiver<Arc<Message>>,
    ) -> Result<CloseReason, TransportError> {
        self.conn
            .send(&ServerFrame::connected(subscriber, self.watermark))
            .await?;

        // Registered before the backlog is read, so nothing persisted after
        // this point can be missed; anything seen twice is skipped below.
        let backlog = match self.watermark {
            Some(w) => self.hub.history_since(w).await,
            None => self.hub.history().await,
        };
        let backlog = match backlog {
            Ok(backlog) => backlog,
            Err(e) => {
                warn!(subscriber, error = %e, "Failed to load backlog");
                self.conn
                    .send(&ServerFrame::error(None, codes::PERSISTENCE_FAILED, e.to_string()))
                    .await?;
                return Ok(CloseReason::ReplayFailed);
            }
        };

        let mut last_sent = self.watermark.unwrap_or(0);
        for message in &backlog {
            if message.id > last_sent {
                self.conn
                    .send(&ServerFrame::message(message.id, &message.author, &message.body))
                    .await?;
                last_sent = message.id;
            }
        }
        debug!(subscriber, replayed = backlog.len(), last_sent, "Backlog replayed");

        let mut pending = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;

                delivery = deliveries.recv() => match delivery {
                    Some(message) => {
                        if message.id > last_sent {
                            let frame =
                                ServerFrame::message(message.id, &message.author, &message.body);
                            self.conn.send(&frame).await?;
                            last_sent = message.id;
                        }
                    }
                    None => {
                        warn!(subscriber, last_sent, "Subscriber dropped by broadcaster");
                        return Ok(CloseReason::Dropped);
                    }
                },

                Some((request, outcome)) = pending.next(), if !pending.is_empty() => {
                    self.conn.send(&ack_frame(request, outcome)).await?;
                }

                () = shutdown_requested(&mut self.shutdown) => {
                    debug!(subscriber, "Closing for shutdown");
                    return Ok(CloseReason::Shutdown);
                }

                inbound = self.conn.recv() => match inbound? {
                    Some(Inbound::Frame(frame)) => match self.handle_frame(frame).await? {
                        Step::Continue => {}
                        Step::AwaitAck(request, rx) => {
                            pending.push(async move { (request, rx.await) });
                        }
                        Step::Close(reason) => return Ok(reason),
                    },
                    Some(Inbound::Malformed(e)) => {
                        debug!(subscriber, error = %e, "Malformed frame");
                        self.conn
                            .send(&ServerFrame::error(None, codes::INVALID_FRAME, e.to_string()))
                            .await?;
                    }
                    None => return Ok(CloseReason::PeerClosed),
                },
            }
        }
    }

    async fn handle_frame(
        &mut self,
        frame: ClientFrame,
    ) -> Result<Step, TransportError> {
        match frame {
            ClientFrame::Submit {
                request,
                author,
                body,
            } => {
                let message = NewMessage::new(author, body);
                let submitted = match request {
                    Some(request) => self
                        .hub
                        .ingest()
                        .enqueue_with_ack(message)
                        .map(|rx| Step::AwaitAck(request, rx)),
                    None => self.hub.ingest().submit(message).map(|()| Step::Continue),
                };

                match submitted {
                    Ok(step) => Ok(step),
                    Err(SubmitError::Invalid(e)) => {
                        let frame =
                            ServerFrame::error(request, codes::INVALID_MESSAGE, e.to_string());
                        self.conn.send(&frame).await?;
                        Ok(Step::Continue)
                    }
                    Err(e) => {
                        let _ = self
                            .conn
                            .send(&ServerFrame::error(request, codes::UNAVAILABLE, e.to_string()))
                            .await;
                        Ok(Step::Close(CloseReason::Shutdown))
                    }
                }
            }
            ClientFrame::Ping { timestamp } => {
                self.conn.send(&ServerFrame::pong(timestamp)).await?;
                Ok(Step::Continue)
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        if rx.wait_for(|stop| *stop).await.is_ok() {
            return;
        }
    }
    // No signal, or its sender is gone without firing
    std::future::pending::<()>().await;
}

fn ack_frame(request: u64, outcome: Result<AckResult, oneshot::error::RecvError>) -> ServerFrame {
    match outcome {
        Ok(Ok(message)) => ServerFrame::ack(request, message.id),
        Ok(Err(SubmitError::Persist(e))) => {
            ServerFrame::error(Some(request), codes::PERSISTENCE_FAILED, e.to_string())
        }
        Ok(Err(SubmitError::Invalid(e))) => {
            ServerFrame::error(Some(request), codes::INVALID_MESSAGE, e.to_string())
        }
        Ok(Err(SubmitError::Closed)) | Err(_) => {
            ServerFrame::error(Some(request), codes::UNAVAILABLE, "broadcaster unavailable")
        }
    }
}
