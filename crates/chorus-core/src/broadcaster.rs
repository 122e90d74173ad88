//! Ingestion queue and broadcaster loop.
//!
//! Every transport submits into one unbounded queue. A single broadcaster
//! task drains it: it assigns the ID, appends to the store and only then
//! fans the message out. That one consumer is what gives the stream its
//! global order.

use crate::message::{Message, MessageError, NewMessage};
use crate::metrics;
use crate::registry::{Registry, SubscriberKind};
use crate::sequencer::Sequencer;
use crate::store::{MessageStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Submission errors.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The submission failed validation.
    #[error("Invalid message: {0}")]
    Invalid(#[from] MessageError),

    /// The store rejected the message; it was not broadcast.
    #[error("Persistence failed: {0}")]
    Persist(#[source] StoreError),

    /// The broadcaster is no longer running.
    #[error("Broadcaster is not running")]
    Closed,
}

/// Outcome delivered to a submitter that asked for one.
pub type AckResult = Result<Message, SubmitError>;

#[derive(Debug)]
struct Submission {
    message: NewMessage,
    ack: Option<oneshot::Sender<AckResult>>,
}

/// Producer handle for the ingestion queue. Cheap to clone.
///
/// Enqueueing never blocks.
#[derive(Debug, Clone)]
pub struct Ingest {
    tx: mpsc::UnboundedSender<Submission>,
    max_body_length: usize,
}

impl Ingest {
    /// Submit without waiting for the outcome.
    ///
    /// A persistence failure is logged by the broadcaster and the message
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is invalid or the broadcaster is gone.
    pub fn submit(&self, message: NewMessage) -> Result<(), SubmitError> {
        self.enqueue(message, None)
    }

    /// Submit and return a receiver for the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is invalid or the broadcaster is gone.
    pub fn enqueue_with_ack(
        &self,
        message: NewMessage,
    ) -> Result<oneshot::Receiver<AckResult>, SubmitError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(message, Some(tx))?;
        Ok(rx)
    }

    /// Submit and wait until the message is persisted and broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is invalid, could not be persisted,
    /// or the broadcaster is gone.
    pub async fn submit_and_wait(&self, message: NewMessage) -> AckResult {
        let rx = self.enqueue_with_ack(message)?;
        rx.await.map_err(|_| SubmitError::Closed)?
    }

    fn enqueue(
        &self,
        message: NewMessage,
        ack: Option<oneshot::Sender<AckResult>>,
    ) -> Result<(), SubmitError> {
        message.validate(self.max_body_length)?;
        self.tx
            .send(Submission { message, ack })
            .map_err(|_| SubmitError::Closed)
    }
}

/// Result of fanning one message out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Subscribers that accepted the message.
    pub delivered: usize,
    /// Subscribers that failed and were unregistered.
    pub dropped: usize,
}

/// Deliver a message to every registered subscriber without waiting.
///
/// A subscriber whose queue is full or closed is unregistered; the others
/// are unaffected.
pub fn fan_out(registry: &Registry, message: &Arc<Message>) -> FanoutReport {
    let mut report = FanoutReport::default();

    for subscription in registry.snapshot() {
        match subscription.handle.try_deliver(message) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                registry.unregister(subscription.id);
                report.dropped += 1;
                match subscription.kind {
                    SubscriberKind::Push => warn!(
                        subscriber = subscription.id,
                        message_id = message.id,
                        reason = %e,
                        "Dropped push subscriber"
                    ),
                    SubscriberKind::Pull => debug!(
                        subscriber = subscription.id,
                        message_id = message.id,
                        reason = %e,
                        "Dropped pull delivery"
                    ),
                }
            }
        }
    }

    metrics::record_fanout(report.delivered, report.dropped);
    report
}

/// The sole consumer of the ingestion queue and sole writer of the store.
pub struct Broadcaster {
    rx: mpsc::UnboundedReceiver<Submission>,
    sequencer: Arc<Sequencer>,
    store: Arc<dyn MessageStore>,
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// Create the ingestion queue and the broadcaster that drains it.
    #[must_use]
    pub fn new(
        sequencer: Arc<Sequencer>,
        store: Arc<dyn MessageStore>,
        registry: Arc<Registry>,
        max_body_length: usize,
    ) -> (Self, Ingest) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broadcaster = Self {
            rx,
            sequencer,
            store,
            registry,
        };
        (broadcaster, Ingest { tx, max_body_length })
    }

    /// Run until every [`Ingest`] handle is dropped.
    pub async fn run(mut self) {
        info!(store = self.store.name(), "Broadcaster started");

        while let Some(submission) = self.rx.recv().await {
            self.process(submission).await;
        }

        info!("Ingestion queue closed, broadcaster stopped");
    }

    /// Spawn [`Broadcaster::run`] on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn process(&self, submission: Submission) -> Option<FanoutReport> {
        let Submission { message, ack } = submission;
        let message = message.into_message(self.sequencer.next());

        if let Err(e) = self.store.append(&message).await {
            metrics::record_persist_failure();
            match ack {
                Some(ack) => {
                    warn!(
                        message_id = message.id,
                        error = %e,
                        "Persist failed, reporting to submitter"
                    );
                    let _ = ack.send(Err(SubmitError::Persist(e)));
                }
                None => {
                    error!(message_id = message.id, error = %e, "Persist failed, message dropped");
                }
            }
            return None;
        }
        metrics::record_persisted();

        let message = Arc::new(message);
        let report = fan_out(&self.registry, &message);
        trace!(
            message_id = message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast"
        );

        if let Some(ack) = ack {
            // The submitter may have gone away; the message is already out.
            let _ = ack.send(Ok(Message::clone(&message)));
        }

        Some(report)
    }
}
