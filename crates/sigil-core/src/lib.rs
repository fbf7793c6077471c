//! Core domain primitives for artifact sealing and ledger anchoring.
//!
//! Provides the strongly-typed digests, fingerprint keys, publisher
//! addresses and attestation records shared by every other crate, along with
//! the transaction model, the `LedgerGateway` boundary trait, ledger events,
//! the clock abstraction, and the ledger error taxonomy.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod encoding;
pub mod error;
pub mod events;
pub mod gateway;
pub mod models;
pub mod time;
pub mod transaction;

pub use error::{CoreError, ErrorCategory, LedgerError, RejectReason, Result};
pub use events::{
    AttestedEvent, EventHandler, LedgerEvent, MulticastEventHandler, NoOpEventHandler,
    PublisherChangedEvent,
};
pub use gateway::{LedgerGateway, ReceiptStatus, TxReceipt};
pub use models::{
    Address, AttestationDate, AttestationRecord, Digest, FingerprintKey, LeafHash, MerkleRoot,
    RecordKey, TxHash,
};
pub use time::{Clock, RealClock, TestClock};
pub use transaction::{LedgerCall, SignedTransaction, Transaction, TransactionSigner};
