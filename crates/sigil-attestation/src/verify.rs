//! Third-party verification of artifact inclusion and anchoring.
//!
//! Checks run cheapest first: the local content hash, then the local proof
//! walk, then the ledger read. A failed check stops the pipeline and is
//! reported as a typed verdict; only ledger failures surface as errors.

use std::{fmt, sync::Arc};

use serde::Serialize;
use sigil_core::{LeafHash, LedgerError, LedgerGateway, MerkleRoot, RecordKey};
use tracing::{debug, info, warn};

use crate::{
    hasher::hash_bytes,
    manifest::{Manifest, ManifestEntry, ProofBundle},
    merkle::{verify_inclusion, InclusionProof},
};

/// Outcome of verifying one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Content, proof and ledger record all agree.
    Verified,
    /// Artifact content does not match the manifest entry.
    HashMismatch {
        /// Hash recorded in the manifest, if the artifact is listed.
        expected: Option<LeafHash>,
        /// Hash of the content presented.
        actual: LeafHash,
    },
    /// The proof does not lead to the manifest root, or the manifest is
    /// internally inconsistent.
    ProofInvalid,
    /// The ledger has no record for the key, or a different root.
    NotAnchored {
        /// Root stored on the ledger, if any.
        anchored_root: Option<MerkleRoot>,
    },
}

impl Verdict {
    /// Process exit code for this verdict.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Verified => 0,
            Self::HashMismatch { .. } | Self::ProofInvalid => 1,
            Self::NotAnchored { .. } => 2,
        }
    }

    /// Returns true only for `Verified`.
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "VERIFIED"),
            Self::HashMismatch { expected: Some(expected), actual } => {
                write!(f, "HASH MISMATCH: manifest records {expected}, artifact hashes to {actual}")
            },
            Self::HashMismatch { expected: None, actual } => {
                write!(f, "HASH MISMATCH: artifact {actual} is not listed in the manifest")
            },
            Self::ProofInvalid => write!(f, "PROOF INVALID"),
            Self::NotAnchored { anchored_root: Some(root) } => {
                write!(f, "NOT ANCHORED: ledger holds a different root {root}")
            },
            Self::NotAnchored { anchored_root: None } => write!(f, "NOT ANCHORED: no ledger record"),
        }
    }
}

/// Verifies artifacts against manifests, proofs and ledger state.
#[derive(Clone)]
pub struct VerificationService {
    gateway: Arc<dyn LedgerGateway>,
}

impl fmt::Debug for VerificationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationService").finish_non_exhaustive()
    }
}

impl VerificationService {
    /// Creates a verifier reading from `gateway`.
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self { gateway }
    }

    /// Verifies `content` against one manifest entry, its proof, the
    /// manifest root and the ledger record at `key`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError` only if the ledger read fails; every other
    /// outcome is a `Verdict`.
    pub async fn verify(
        &self,
        content: &[u8],
        entry: &ManifestEntry,
        proof: &InclusionProof,
        manifest_root: &MerkleRoot,
        key: &RecordKey,
    ) -> Result<Verdict, LedgerError> {
        let actual = hash_bytes(content);
        if actual != entry.leaf_hash {
            warn!(path = %entry.path, expected = %entry.leaf_hash, actual = %actual, "artifact hash mismatch");
            return Ok(Verdict::HashMismatch { expected: Some(entry.leaf_hash), actual });
        }

        if !verify_inclusion(&actual, proof, manifest_root) {
            warn!(path = %entry.path, root = %manifest_root, "inclusion proof does not reach root");
            return Ok(Verdict::ProofInvalid);
        }

        let record = self.gateway.get_record(key).await?;
        let verdict = match record {
            Some(record) if record.root == *manifest_root => Verdict::Verified,
            Some(record) => Verdict::NotAnchored { anchored_root: Some(record.root) },
            None => Verdict::NotAnchored { anchored_root: None },
        };

        info!(path = %entry.path, key = %key, verdict = %verdict, "verification finished");
        Ok(verdict)
    }

    /// File-level entry point: locates the manifest entry by the bundle's
    /// path and checks manifest integrity before verifying.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError` only if the ledger read fails.
    pub async fn verify_bundle(
        &self,
        content: &[u8],
        manifest: &Manifest,
        bundle: &ProofBundle,
        key: &RecordKey,
    ) -> Result<Verdict, LedgerError> {
        if let Err(e) = manifest.validate() {
            warn!(error = %e, "manifest failed integrity check");
            return Ok(Verdict::ProofInvalid);
        }

        let Some((_, entry)) = manifest.entry(&bundle.path) else {
            let actual = hash_bytes(content);
            debug!(path = %bundle.path, "artifact not listed in manifest");
            return Ok(Verdict::HashMismatch { expected: None, actual });
        };

        if bundle.root != manifest.root || bundle.batch_id != manifest.batch_id {
            let actual = hash_bytes(content);
            if actual != entry.leaf_hash {
                return Ok(Verdict::HashMismatch { expected: Some(entry.leaf_hash), actual });
            }
            warn!(bundle_root = %bundle.root, manifest_root = %manifest.root, "proof bundle belongs to another batch");
            return Ok(Verdict::ProofInvalid);
        }

        self.verify(content, entry, &bundle.proof, &manifest.root, key).await
    }
}
