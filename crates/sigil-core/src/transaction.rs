//! Ledger transactions and their canonical signing payload.
//!
//! A transaction names its sender, the sender's next sequence number, and a
//! single ledger call. The canonical byte encoding is what gets signed and
//! hashed, so it must stay stable across releases: fields are written in a
//! fixed order with fixed widths, and the only variable-length field
//! (`batch_id`) carries a big-endian length prefix.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{
    encoding::hex_bytes,
    models::{Address, AttestationDate, Digest, FingerprintKey, MerkleRoot, TxHash},
};

/// Domain separation tag prefixed to every signing payload.
pub const PAYLOAD_DOMAIN: &[u8] = b"sigil-tx-v1";

const CALL_TAG_ATTEST: u8 = 0x01;
const CALL_TAG_SET_PUBLISHER: u8 = 0x02;

/// A single operation against the attestation ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LedgerCall {
    /// Write the record for `(fingerprint, date)`.
    Attest {
        /// Attestation stream.
        fingerprint: FingerprintKey,
        /// Day the record is filed under.
        date: AttestationDate,
        /// Merkle root being anchored.
        root: MerkleRoot,
        /// Batch identifier stored alongside the root.
        batch_id: String,
    },
    /// Owner-only: authorise `publisher` to write records for `fingerprint`.
    SetPublisher {
        /// Attestation stream.
        fingerprint: FingerprintKey,
        /// Identity being authorised.
        publisher: Address,
    },
}

impl LedgerCall {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Attest { .. } => "attest",
            Self::SetPublisher { .. } => "set_publisher",
        }
    }

    /// Fingerprint the call operates on.
    pub fn fingerprint(&self) -> &FingerprintKey {
        match self {
            Self::Attest { fingerprint, .. } | Self::SetPublisher { fingerprint, .. } => fingerprint,
        }
    }
}

/// Unsigned ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identity submitting the transaction.
    pub sender: Address,
    /// Sender's sequence number; must equal the ledger's next expected value.
    pub sequence: u64,
    /// Operation to execute.
    pub call: LedgerCall,
}

impl Transaction {
    /// Creates a transaction.
    pub fn new(sender: Address, sequence: u64, call: LedgerCall) -> Self {
        Self { sender, sequence, call }
    }

    /// Canonical byte encoding that is signed and hashed.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(160);
        buf.extend_from_slice(PAYLOAD_DOMAIN);
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());

        match &self.call {
            LedgerCall::Attest { fingerprint, date, root, batch_id } => {
                buf.push(CALL_TAG_ATTEST);
                buf.extend_from_slice(fingerprint.digest().as_bytes());
                buf.extend_from_slice(&date.as_compact().to_be_bytes());
                buf.extend_from_slice(root.as_bytes());
                // Batch ids are operator-supplied labels, far below u32::MAX.
                let len = u32::try_from(batch_id.len()).unwrap_or(u32::MAX);
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(batch_id.as_bytes());
            },
            LedgerCall::SetPublisher { fingerprint, publisher } => {
                buf.push(CALL_TAG_SET_PUBLISHER);
                buf.extend_from_slice(fingerprint.digest().as_bytes());
                buf.extend_from_slice(publisher.as_bytes());
            },
        }

        buf
    }

    /// Hash identifying this transaction on the ledger.
    pub fn hash(&self) -> TxHash {
        Digest::of(&self.signing_payload())
    }
}

/// Transaction with the sender's public key and Ed25519 signature attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// The signed transaction.
    pub transaction: Transaction,
    /// Sender's Ed25519 public key.
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// Signature over `transaction.signing_payload()`.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Hash of the inner transaction.
    pub fn hash(&self) -> TxHash {
        self.transaction.hash()
    }

    /// Checks the signature and that the sender address derives from the
    /// attached public key.
    pub fn verify(&self) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(self.public_key.as_slice()) else {
            return false;
        };
        if Address::from_public_key(&key_bytes) != self.transaction.sender {
            return false;
        }
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };

        verifying_key.verify(&self.transaction.signing_payload(), &signature).is_ok()
    }
}

/// Capability that authorises ledger writes on behalf of one identity.
///
/// Identity-provider integrations sit behind this trait; the attestation
/// logic only ever asks for an address and a signature.
pub trait TransactionSigner: Send + Sync {
    /// Ledger address of the signing identity.
    fn address(&self) -> Address;

    /// Signs `transaction`, attaching the public key.
    fn sign(&self, transaction: Transaction) -> SignedTransaction;
}
