//! Boundary trait for the public attestation ledger.
//!
//! The client, the verifier and the CLI only talk to the ledger through
//! `LedgerGateway`, so the same logic runs against a JSON-RPC node or the
//! in-memory ledger used in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{RejectReason, Result},
    models::{Address, AttestationRecord, FingerprintKey, RecordKey, TxHash},
    transaction::SignedTransaction,
};

/// Execution result of an included transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// The call executed and changed ledger state.
    Accepted,
    /// The call was included but refused by the state machine.
    Rejected(RejectReason),
}

/// Proof that a transaction was included in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Hash of the included transaction.
    pub tx_hash: TxHash,
    /// Height of the block that included it.
    pub height: u64,
    /// Execution result.
    pub status: ReceiptStatus,
}

impl TxReceipt {
    /// Number of confirmations at `current_height`, counting the inclusion
    /// block itself.
    pub fn confirmations(&self, current_height: u64) -> u64 {
        current_height.saturating_add(1).saturating_sub(self.height)
    }

    /// Returns true if the call executed.
    pub fn is_accepted(&self) -> bool {
        self.status == ReceiptStatus::Accepted
    }
}

/// Read/write access to the attestation ledger.
///
/// Implementations classify failures into `LedgerError` variants; callers
/// rely on `RpcTransient` being safe to retry.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Reads the record stored for `key`, or `None` when unset.
    async fn get_record(&self, key: &RecordKey) -> Result<Option<AttestationRecord>>;

    /// Reads the publisher registered for `fingerprint`.
    async fn publisher_of(&self, fingerprint: &FingerprintKey) -> Result<Option<Address>>;

    /// Next sequence number the ledger expects from `address`.
    async fn next_sequence(&self, address: &Address) -> Result<u64>;

    /// Submits a signed transaction and returns its hash.
    ///
    /// Submitting an identical transaction twice returns the same hash
    /// without executing it again.
    async fn submit(&self, transaction: &SignedTransaction) -> Result<TxHash>;

    /// Receipt of an included transaction, or `None` while pending.
    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>>;

    /// Current ledger height.
    async fn height(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Digest;

    #[test]
    fn confirmations_count_inclusion_block() {
        let receipt =
            TxReceipt { tx_hash: Digest::of(b"tx"), height: 10, status: ReceiptStatus::Accepted };

        assert_eq!(receipt.confirmations(10), 1);
        assert_eq!(receipt.confirmations(12), 3);
        assert_eq!(receipt.confirmations(9), 0);
    }

    #[test]
    fn receipt_status_wire_format() {
        let rejected = ReceiptStatus::Rejected(RejectReason::AlreadyAttested);
        let value = serde_json::to_value(rejected).unwrap();
        assert_eq!(value["status"], "rejected");
        assert_eq!(value["reason"], "already_attested");

        let accepted = serde_json::to_value(ReceiptStatus::Accepted).unwrap();
        assert_eq!(accepted["status"], "accepted");
    }
}
