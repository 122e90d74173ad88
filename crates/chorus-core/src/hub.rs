//! Process-wide wiring of the core components.

use crate::broadcaster::{Broadcaster, Ingest};
use crate::message::{Message, MessageId, DEFAULT_MAX_BODY_LENGTH};
use crate::registry::Registry;
use crate::sequencer::Sequencer;
use crate::store::{MessageStore, StoreError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Undelivered messages a push subscriber may buffer before it is dropped.
    pub push_buffer: usize,
    /// Maximum message body length in bytes.
    pub max_body_length: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            push_buffer: 256,
            max_body_length: DEFAULT_MAX_BODY_LENGTH,
        }
    }
}

/// Handle to the running core: registry, ingestion queue and store.
///
/// Constructed once per process and cloned into every transport.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    ingest: Ingest,
    store: Arc<dyn MessageStore>,
    sequencer: Arc<Sequencer>,
    config: HubConfig,
}

impl Hub {
    /// Load history, resume the sequencer after it and spawn the broadcaster.
    ///
    /// The broadcaster runs until every clone of the hub is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing history cannot be loaded.
    pub async fn start(
        store: Arc<dyn MessageStore>,
        config: HubConfig,
    ) -> Result<(Self, JoinHandle<()>), StoreError> {
        let history = store.load_all().await?;
        let last_id = history.iter().map(|m| m.id).max().unwrap_or(0);
        let sequencer = Arc::new(Sequencer::resume_after(last_id));
        let registry = Arc::new(Registry::new());

        info!(
            store = store.name(),
            messages = history.len(),
            last_id,
            "Loaded message history"
        );

        let (broadcaster, ingest) = Broadcaster::new(
            Arc::clone(&sequencer),
            Arc::clone(&store),
            Arc::clone(&registry),
            config.max_body_length,
        );
        let task = broadcaster.spawn();

        Ok((
            Self {
                registry,
                ingest,
                store,
                sequencer,
                config,
            },
            task,
        ))
    }

    /// The subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The ingestion queue.
    #[must_use]
    pub fn ingest(&self) -> &Ingest {
        &self.ingest
    }

    /// Hub configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Name of the persistence backend.
    #[must_use]
    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Highest message ID issued so far.
    #[must_use]
    pub fn last_id(&self) -> MessageId {
        self.sequencer.last_issued()
    }

    /// Full persisted history in ID order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn history(&self) -> Result<Vec<Message>, StoreError> {
        self.store.load_all().await
    }

    /// Persisted messages with an ID above `watermark`, in ID order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn history_since(&self, watermark: MessageId) -> Result<Vec<Message>, StoreError> {
        self.store.load_since(watermark).await
    }
}
