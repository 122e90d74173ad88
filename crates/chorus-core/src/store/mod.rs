//! Message persistence.
//!
//! The broadcaster is the only writer of a [`MessageStore`]; transports read
//! from it concurrently to serve history and replay backlogs.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::message::{Message, MessageId};
use async_trait::async_trait;
use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A stored record could not be parsed.
    #[error("Corrupt record at line {line}: {source}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Parse error.
        source: serde_json::Error,
    },

    /// The backend refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only message log.
///
/// `load_all` returns messages in ascending ID order, which is the order
/// they were appended in.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably append a message.
    async fn append(&self, message: &Message) -> Result<(), StoreError>;

    /// Load the full log.
    async fn load_all(&self) -> Result<Vec<Message>, StoreError>;

    /// Load every message with an ID above `watermark`.
    async fn load_since(&self, watermark: MessageId) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.load_all().await?;
        messages.retain(|m| m.id > watermark);
        Ok(messages)
    }

    /// Backend name, for logs and health output.
    fn name(&self) -> &'static str;
}
