//! Artifact sealing, Merkle batching and inclusion verification.
//!
//! Hashes build artifacts into leaves, folds the path-sorted leaves into a
//! Merkle tree with odd-node promotion, writes write-once manifests and
//! per-artifact proof bundles, and verifies artifacts against a manifest and
//! the ledger. Also provides the Ed25519 `SigningIdentity` used to authorise
//! ledger writes and the local CSV audit trail.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod merkle;
pub mod seal;
pub mod signing;
pub mod verify;

pub use audit::{AuditEntry, AuditStage, AuditTrail};
pub use error::{AttestationError, Result};
pub use hasher::{hash_bytes, hash_directory, Artifact, HashReport};
pub use manifest::{Diagnostics, Manifest, ManifestEntry, ProofBundle, SkippedArtifact};
pub use merkle::{
    hash_pair, verify_inclusion, InclusionProof, MerkleTree, ProofStep, SiblingPosition,
};
pub use seal::{proof_path, SealedBatch, Sealer};
pub use signing::SigningIdentity;
pub use verify::{VerificationService, Verdict};
