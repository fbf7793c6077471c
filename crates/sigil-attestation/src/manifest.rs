//! Manifest and proof-bundle files produced by sealing.
//!
//! A manifest is written once per sealing run and never mutated: writing
//! refuses to replace an existing file, so a new seal always lands at a new
//! path and a failed anchor can be retried from the preserved manifest
//! without re-hashing.

use std::{
    fs::OpenOptions,
    io::Write as _,
    path::Path,
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sigil_core::{AttestationDate, LeafHash, MerkleRoot};

use crate::{
    error::{AttestationError, Result},
    merkle::{order_entries, InclusionProof, MerkleTree},
};

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// One sealed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the sealed root, `/`-separated.
    pub path: String,
    /// SHA-256 of the artifact content.
    pub leaf_hash: LeafHash,
    /// Content length in bytes.
    pub size: u64,
}

/// Artifact left out of a batch because it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedArtifact {
    /// Path relative to the sealed root.
    pub path: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Non-fatal findings recorded during sealing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Artifacts excluded from the batch.
    #[serde(default)]
    pub skipped: Vec<SkippedArtifact>,
}

/// Sealed batch description: ordered leaves, batch identity and root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version.
    pub version: u32,
    /// Operator-chosen batch identifier.
    pub batch_id: String,
    /// When the batch was sealed.
    pub created_at: DateTime<Utc>,
    /// Entries sorted by path.
    pub entries: Vec<ManifestEntry>,
    /// Merkle root over `entries`.
    pub root: MerkleRoot,
    /// Sealing diagnostics.
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl Manifest {
    /// Orders `entries`, builds the tree and assembles the manifest.
    ///
    /// # Errors
    ///
    /// Returns `BlankBatchId` for an empty or whitespace-only `batch_id`,
    /// or `EmptyBatch` or `DuplicatePath` from entry ordering.
    pub fn build(
        batch_id: impl Into<String>,
        created_at: DateTime<Utc>,
        entries: Vec<ManifestEntry>,
        skipped: Vec<SkippedArtifact>,
    ) -> Result<(Self, MerkleTree)> {
        let batch_id = batch_id.into();
        check_batch_id(&batch_id)?;
        let entries = order_entries(entries)?;
        let tree = MerkleTree::build(&leaf_hashes(&entries))?;

        let manifest = Self {
            version: MANIFEST_VERSION,
            batch_id,
            created_at,
            root: tree.root(),
            entries,
            diagnostics: Diagnostics { skipped },
        };
        Ok((manifest, tree))
    }

    /// Rebuilds the Merkle tree from the recorded entries.
    ///
    /// # Errors
    ///
    /// Returns `EmptyBatch` if the manifest has no entries.
    pub fn tree(&self) -> Result<MerkleTree> {
        MerkleTree::build(&leaf_hashes(&self.entries))
    }

    /// Checks the manifest's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `ManifestCorrupt` for an unknown version, unsorted or
    /// duplicate entries, an empty batch id, or a root that does not match
    /// the entries.
    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(AttestationError::manifest_corrupt(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if check_batch_id(&self.batch_id).is_err() {
            return Err(AttestationError::manifest_corrupt("empty batch id"));
        }
        if self.entries.is_empty() {
            return Err(AttestationError::manifest_corrupt("no entries"));
        }
        if let Some(pair) = self.entries.windows(2).find(|pair| pair[0].path >= pair[1].path) {
            return Err(AttestationError::manifest_corrupt(format!(
                "entries out of order or duplicated at {}",
                pair[1].path
            )));
        }

        let recomputed = self.tree()?.root();
        if recomputed != self.root {
            return Err(AttestationError::manifest_corrupt(format!(
                "root {} does not match entries (recomputed {recomputed})",
                self.root
            )));
        }
        Ok(())
    }

    /// Looks up an entry and its leaf index by path.
    pub fn entry(&self, path: &str) -> Option<(usize, &ManifestEntry)> {
        self.entries
            .binary_search_by(|entry| entry.path.as_str().cmp(path))
            .ok()
            .map(|index| (index, &self.entries[index]))
    }

    /// Builds the proof bundle for the artifact at `path`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownArtifact` if `path` is not in the manifest.
    pub fn prove(&self, path: &str) -> Result<ProofBundle> {
        let tree = self.tree()?;
        self.bundle_from_tree(&tree, path)
    }

    /// Builds a proof bundle for `path` from an already-built tree.
    ///
    /// # Errors
    ///
    /// Returns `UnknownArtifact` if `path` is not in the manifest.
    pub fn bundle_from_tree(&self, tree: &MerkleTree, path: &str) -> Result<ProofBundle> {
        let (index, entry) =
            self.entry(path).ok_or_else(|| AttestationError::UnknownArtifact { path: path.to_string() })?;

        Ok(ProofBundle {
            batch_id: self.batch_id.clone(),
            path: entry.path.clone(),
            leaf_hash: entry.leaf_hash,
            root: self.root,
            proof: tree.prove(index)?,
        })
    }

    /// UTC day the batch was sealed; the default anchoring date.
    pub fn attestation_date(&self) -> AttestationDate {
        AttestationDate::from_datetime(&self.created_at)
    }

    /// Writes the manifest as JSON, refusing to overwrite.
    ///
    /// # Errors
    ///
    /// Returns `ManifestExists` if `path` already exists.
    pub fn write_new(&self, path: &Path) -> Result<()> {
        write_json(path, self, true).map_err(|e| match e {
            AttestationError::Io { source, .. } if source.kind() == std::io::ErrorKind::AlreadyExists => {
                AttestationError::ManifestExists { path: path.to_path_buf() }
            },
            other => other,
        })
    }

    /// Reads a manifest without validating it.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serialization` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

fn leaf_hashes(entries: &[ManifestEntry]) -> Vec<LeafHash> {
    entries.iter().map(|entry| entry.leaf_hash).collect()
}

/// Self-contained inclusion proof for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    /// Batch the artifact was sealed in.
    pub batch_id: String,
    /// Artifact path.
    pub path: String,
    /// Leaf hash recorded at sealing time.
    pub leaf_hash: LeafHash,
    /// Root the proof leads to.
    pub root: MerkleRoot,
    /// Sibling path.
    pub proof: InclusionProof,
}

impl ProofBundle {
    /// Writes the bundle as JSON, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serialization` on failure.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_json(path, self, false)
    }

    /// Reads a bundle.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Serialization` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T, create_new: bool) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value)?;
    json.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AttestationError::io(parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if create_new {
        options.create_new(true);
    } else {
        options.create(true).truncate(true);
    }

    let mut file = options.open(path).map_err(|e| AttestationError::io(path, e))?;
    file.write_all(&json).map_err(|e| AttestationError::io(path, e))?;
    file.sync_all().map_err(|e| AttestationError::io(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read(path).map_err(|e| AttestationError::io(path, e))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Rejects batch ids that are empty or only whitespace.
pub(crate) fn check_batch_id(batch_id: &str) -> Result<()> {
    if batch_id.trim().is_empty() {
        return Err(AttestationError::BlankBatchId);
    }
    Ok(())
}
