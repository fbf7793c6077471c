//! Ledger side of the attestation pipeline.
//!
//! Contains the attestation state machine (`AttestationLedgerState`), an
//! in-memory ledger for tests and dry runs, the JSON-RPC gateway for real
//! nodes, the per-identity `SubmissionQueue`, retry policy, and the
//! idempotent `AttestationClient` that ties them together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod memory;
pub mod queue;
pub mod retry;
pub mod rpc;
pub mod state;

pub use client::{AttestOutcome, AttestationClient, ClientConfig};
pub use memory::InMemoryLedger;
pub use queue::{QueueConfig, SubmissionQueue, SubmittedTx};
pub use retry::{with_retry, BackoffStrategy, RetryDecision, RetryPolicy};
pub use rpc::{GatewayConfig, RpcLedgerGateway};
pub use state::{
    AttestationLedgerState, ExecutionContext, KeyState, MemoryRecordStore, RecordStore,
};
