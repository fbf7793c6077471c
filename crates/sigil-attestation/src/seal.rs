//! Sealing: hash a directory, build the batch tree, emit the manifest.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use sigil_core::{Clock, RealClock};
use tracing::{info, info_span, Instrument};

use crate::{
    error::Result,
    hasher::hash_directory,
    manifest::{check_batch_id, Manifest, ProofBundle},
    merkle::MerkleTree,
};

/// Default number of artifacts hashed concurrently.
pub const DEFAULT_HASH_CONCURRENCY: usize = 8;

/// Result of one sealing run.
#[derive(Debug, Clone)]
pub struct SealedBatch {
    /// Manifest describing the batch.
    pub manifest: Manifest,
    /// Tree built over the manifest entries.
    pub tree: MerkleTree,
}

impl SealedBatch {
    /// Proof bundles for every artifact in the batch.
    ///
    /// # Errors
    ///
    /// Only fails if the manifest and tree disagree, which `Sealer` never
    /// produces.
    pub fn proofs(&self) -> Result<Vec<ProofBundle>> {
        self.manifest
            .entries
            .iter()
            .map(|entry| self.manifest.bundle_from_tree(&self.tree, &entry.path))
            .collect()
    }

    /// Writes one `<path>.proof.json` per artifact under `dir`, mirroring
    /// the artifact layout.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serialization` on write failure.
    pub fn write_proofs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.manifest.entries.len());
        for bundle in self.proofs()? {
            let path = proof_path(dir, &bundle.path);
            bundle.write(&path)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Location of the proof bundle for `artifact_path` under `dir`.
pub fn proof_path(dir: &Path, artifact_path: &str) -> PathBuf {
    dir.join(format!("{artifact_path}.proof.json"))
}

/// Hashes artifacts and assembles sealed batches.
#[derive(Debug, Clone)]
pub struct Sealer {
    concurrency: usize,
    clock: Arc<dyn Clock>,
}

impl Default for Sealer {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_CONCURRENCY)
    }
}

impl Sealer {
    /// Creates a sealer hashing up to `concurrency` artifacts at once.
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency: concurrency.max(1), clock: Arc::new(RealClock::new()) }
    }

    /// Uses `clock` for the batch timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seals every regular file under `root` into batch `batch_id`.
    ///
    /// Unreadable artifacts are listed in the manifest diagnostics and left
    /// out of the tree.
    ///
    /// # Errors
    ///
    /// Returns `BlankBatchId` before touching `root` if `batch_id` is blank,
    /// `EmptyBatch` if nothing could be hashed, or `Io` if `root` cannot be
    /// listed.
    pub async fn seal(&self, root: &Path, batch_id: &str) -> Result<SealedBatch> {
        check_batch_id(batch_id)?;
        let span = info_span!("seal", batch_id = %batch_id, root = %root.display());
        async {
            let report = hash_directory(root, self.concurrency).await?;
            let skipped = report.skipped.len();

            let (manifest, tree) =
                Manifest::build(batch_id, self.clock.now_utc(), report.leaves, report.skipped)?;

            info!(
                root_hash = %manifest.root,
                artifacts = manifest.entries.len(),
                skipped,
                "sealed batch"
            );
            Ok(SealedBatch { manifest, tree })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use sigil_core::{Digest, TestClock};

    use super::*;
    use crate::{error::AttestationError, merkle::verify_inclusion};

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in [("d", "bar"), ("b", "world"), ("a", "hello"), ("c", "foo")] {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn seal_produces_valid_manifest_and_proofs() {
        let dir = fixture();
        let clock = TestClock::starting_at(Utc.with_ymd_and_hms(2025, 8, 25, 10, 0, 0).unwrap());
        let sealer = Sealer::new(2).with_clock(Arc::new(clock));

        let sealed = sealer.seal(dir.path(), "build-7").await.unwrap();
        sealed.manifest.validate().unwrap();
        assert_eq!(sealed.manifest.attestation_date().to_string(), "2025-08-25");
        assert_eq!(sealed.manifest.entries[0].leaf_hash, Digest::of(b"hello"));

        for bundle in sealed.proofs().unwrap() {
            assert!(verify_inclusion(&bundle.leaf_hash, &bundle.proof, &sealed.manifest.root));
        }
    }

    #[tokio::test]
    async fn empty_directory_is_an_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let err = Sealer::default().seal(dir.path(), "b").await.unwrap_err();
        assert!(matches!(err, AttestationError::EmptyBatch));
    }

    #[tokio::test]
    async fn write_proofs_mirrors_layout() {
        let dir = fixture();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/e"), "nested").unwrap();
        let out = tempfile::tempdir().unwrap();

        let sealed = Sealer::default().seal(dir.path(), "b").await.unwrap();
        let written = sealed.write_proofs(out.path()).unwrap();

        assert_eq!(written.len(), 5);
        let bundle = ProofBundle::load(&proof_path(out.path(), "sub/e")).unwrap();
        assert_eq!(bundle.leaf_hash, Digest::of(b"nested"));
    }
}
