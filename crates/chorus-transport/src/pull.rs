//! Pull transport adapter.
//!
//! Each pull request is a single-shot subscription: register a one-message
//! slot, wait for a delivery or the timeout, unregister. The caller polls
//! again to keep receiving.

use chorus_core::{Hub, Message, MessageId, StoreError};
use std::time::Duration;
use tracing::trace;

/// Result of one pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A message arrived within the wait period.
    Message(Message),
    /// The wait period elapsed. Not an error; poll again.
    Empty,
}

/// Wait up to `wait` for the next message.
///
/// With `since`, a message already persisted above that ID is returned
/// immediately (oldest first), so a client that passes the last ID it saw
/// cannot miss a message that landed between two polls. Without it, only
/// messages broadcast while this request is registered are seen, and a
/// second message arriving before the first is collected is dropped.
///
/// The subscription is removed on return and also if the returned future
/// is dropped early.
///
/// # Errors
///
/// Returns an error only if `since` is given and the history cannot be read.
pub async fn poll(
    hub: &Hub,
    wait: Duration,
    since: Option<MessageId>,
) -> Result<PollOutcome, StoreError> {
    let (guard, mut slot) = hub.registry().subscribe_pull();

    if let Some(since) = since {
        if let Some(message) = hub.history_since(since).await?.into_iter().next() {
            trace!(subscriber = guard.id(), message_id = message.id, "Pull served from history");
            return Ok(PollOutcome::Message(message));
        }
    }

    let outcome = match tokio::time::timeout(wait, slot.recv()).await {
        Ok(Some(message)) => PollOutcome::Message(Message::clone(&message)),
        Ok(None) | Err(_) => PollOutcome::Empty,
    };

    trace!(subscriber = guard.id(), outcome = ?outcome, "Pull finished");
    drop(guard);
    Ok(outcome)
}
