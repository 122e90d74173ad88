//! # chorus-core
//!
//! Sequencing, persistence and fan-out for the Chorus chat stream.
//!
//! - **Sequencer** - strictly increasing message IDs
//! - **Registry** - the set of subscribers the next broadcast goes to
//! - **Store** - append-only message log (memory or JSON Lines file)
//! - **Broadcaster** - single consumer of the ingestion queue; persists,
//!   then fans out
//! - **Hub** - wires the above together once per process
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  submit   ┌─────────────┐  append  ┌─────────┐
//! │ Transports │──────────▶│ Broadcaster │─────────▶│  Store  │
//! └────────────┘           └─────────────┘          └─────────┘
//!       │ register               │ fan out
//!       ▼                        ▼
//! ┌────────────┐  snapshot ┌─────────────┐
//! │  Registry  │◀──────────│ Subscribers │
//! └────────────┘           └─────────────┘
//! ```

pub mod broadcaster;
pub mod hub;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod sequencer;
pub mod store;

pub use broadcaster::{fan_out, AckResult, Broadcaster, FanoutReport, Ingest, SubmitError};
pub use hub::{Hub, HubConfig};
pub use message::{Message, MessageError, MessageId, NewMessage};
pub use registry::{
    DeliveryError, DeliveryHandle, Registry, RegistryStats, SubscriberId, SubscriberKind,
    Subscription, SubscriptionGuard,
};
pub use sequencer::Sequencer;
pub use store::{FileStore, MemoryStore, MessageStore, StoreError};
