//! Ledger events for external indexers and local observers.
//!
//! Every accepted state transition on the attestation ledger emits one
//! event. The ledger state machine publishes to a single `EventHandler`;
//! `MulticastEventHandler` fans that out to any number of subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Address, AttestationDate, FingerprintKey, MerkleRoot, TxHash};

/// Events emitted by the attestation ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A record moved from `Unset` to `Attested`.
    Attested(AttestedEvent),

    /// The publisher registered for a fingerprint changed.
    PublisherChanged(PublisherChangedEvent),
}

impl LedgerEvent {
    /// Fingerprint the event concerns.
    pub fn fingerprint(&self) -> &FingerprintKey {
        match self {
            Self::Attested(e) => &e.fingerprint,
            Self::PublisherChanged(e) => &e.fingerprint,
        }
    }
}

/// Write-event carrying the full record, as consumed by indexers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestedEvent {
    /// Attestation stream.
    pub fingerprint: FingerprintKey,

    /// Day the record is filed under.
    pub date: AttestationDate,

    /// Anchored Merkle root.
    pub root: MerkleRoot,

    /// Batch identifier.
    pub batch_id: String,

    /// Ledger time of acceptance.
    pub timestamp: DateTime<Utc>,

    /// Identity that wrote the record.
    pub publisher: Address,

    /// Transaction that carried the write, when known.
    pub tx_hash: Option<TxHash>,

    /// Ledger height the write was included at, when known.
    pub height: Option<u64>,
}

/// Emitted when the owner sets or replaces a publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherChangedEvent {
    /// Attestation stream.
    pub fingerprint: FingerprintKey,

    /// Publisher before the change, if one was registered.
    pub previous: Option<Address>,

    /// Newly authorised publisher.
    pub publisher: Address,

    /// Ledger time of the change.
    pub timestamp: DateTime<Utc>,
}

/// Subscriber side of the ledger event stream.
///
/// Handlers must not fail the transition that produced the event; errors
/// are logged by the handler itself.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles one ledger event.
    async fn handle_event(&self, event: LedgerEvent);
}

/// Event handler that discards all events.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: LedgerEvent) {}
}

/// Forwards each event to every registered subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a handler with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: LedgerEvent) {
        let deliveries = self.handlers.iter().map(|handler| handler.handle_event(event.clone()));
        futures::future::join_all(deliveries).await;
    }
}
