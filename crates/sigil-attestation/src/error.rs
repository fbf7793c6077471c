//! Error types for sealing, batching and verification.
//!
//! Per-artifact failures (`UnreadableArtifact`, `InvalidPath`) are recoverable and end up
//! in a manifest's diagnostics; everything else aborts the operation that
//! raised it.

use std::path::PathBuf;

/// Errors that can occur while sealing artifacts or checking proofs.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    /// Artifact could not be read in full.
    #[error("unreadable artifact {path}: {reason}")]
    UnreadableArtifact {
        /// Artifact path relative to the sealed root.
        path: String,
        /// Why the read failed.
        reason: String,
    },

    /// Artifact path is absolute or escapes the sealed root.
    #[error("invalid artifact path {path}")]
    InvalidPath {
        /// Offending path.
        path: String,
    },

    /// Batch id is empty or only whitespace.
    #[error("batch id must not be blank")]
    BlankBatchId,

    /// A batch must contain at least one leaf.
    #[error("cannot build a batch from zero artifacts")]
    EmptyBatch,

    /// Two artifacts in one batch share a path.
    #[error("duplicate artifact path {path} in batch")]
    DuplicatePath {
        /// Path that occurs more than once.
        path: String,
    },

    /// Leaf index outside the tree.
    #[error("leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of leaves in the tree.
        leaf_count: usize,
    },

    /// Artifact is not listed in the manifest.
    #[error("artifact {path} not found in manifest")]
    UnknownArtifact {
        /// Requested path.
        path: String,
    },

    /// Recomputed root did not match the claimed root.
    #[error("inclusion proof does not reproduce root {expected}")]
    ProofInvalid {
        /// Root the proof claimed to reach.
        expected: sigil_core::MerkleRoot,
    },

    /// Manifest contents are internally inconsistent.
    #[error("manifest is corrupt: {reason}")]
    ManifestCorrupt {
        /// What failed to check out.
        reason: String,
    },

    /// Refused to overwrite an existing manifest.
    #[error("manifest already exists at {}", path.display())]
    ManifestExists {
        /// Existing manifest path.
        path: PathBuf,
    },

    /// Ed25519 key material was malformed.
    #[error("invalid key format: {message}")]
    InvalidKeyFormat {
        /// Detailed error message explaining the format issue.
        message: String,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// Filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl AttestationError {
    /// Creates an unreadable-artifact error.
    pub fn unreadable(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::UnreadableArtifact { path: path.into(), reason: reason.to_string() }
    }

    /// Creates a manifest-corrupt error.
    pub fn manifest_corrupt(reason: impl Into<String>) -> Self {
        Self::ManifestCorrupt { reason: reason.into() }
    }

    /// Creates an invalid key format error with a custom message.
    pub fn invalid_key_format(message: impl Into<String>) -> Self {
        Self::InvalidKeyFormat { message: message.into() }
    }

    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Returns true for failures that only affect one artifact, which the
    /// sealer records and skips.
    pub fn is_per_artifact(&self) -> bool {
        matches!(self, Self::UnreadableArtifact { .. } | Self::InvalidPath { .. })
    }
}

/// Result type alias for attestation operations.
pub type Result<T> = std::result::Result<T, AttestationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_artifact_classification() {
        assert!(AttestationError::unreadable("a.txt", "permission denied").is_per_artifact());
        assert!(AttestationError::InvalidPath { path: "bad\u{fffd}".into() }.is_per_artifact());
        assert!(!AttestationError::EmptyBatch.is_per_artifact());
        assert!(!AttestationError::manifest_corrupt("empty batch id").is_per_artifact());
    }

    #[test]
    fn error_message_formatting() {
        let err = AttestationError::IndexOutOfRange { index: 4, leaf_count: 4 };
        assert_eq!(err.to_string(), "leaf index 4 out of range for 4 leaves");

        let err = AttestationError::unreadable("bin/app", "short read");
        assert_eq!(err.to_string(), "unreadable artifact bin/app: short read");
    }
}
