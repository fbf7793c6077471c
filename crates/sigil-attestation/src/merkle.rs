//! Merkle tree construction and inclusion proofs over artifact leaves.
//!
//! Tree-shaping rule, which provers and verifiers must agree on exactly:
//!
//! - level 0 is the leaf list, already sorted by artifact path;
//! - each next level pairs nodes left to right as `SHA-256(left || right)`;
//! - a trailing odd node is promoted unchanged and contributes no proof
//!   step at that level.
//!
//! A single leaf is therefore its own root with an empty proof. Leaves are
//! raw content hashes with no domain-separation prefix.
//!
//! ```text
//!            root
//!           /    \
//!        h01      c      <- c promoted from level 1
//!       /   \     |
//!      a     b    c      <- leaves
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use sigil_core::{Digest, LeafHash, MerkleRoot};

use crate::{
    error::{AttestationError, Result},
    manifest::ManifestEntry,
};

/// Hashes two sibling nodes into their parent.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest::from_bytes(hasher.finalize().into())
}

/// Sorts batch entries by path and rejects duplicates.
///
/// Re-running the sealer over an unordered listing must reproduce the same
/// root, so every batch goes through this before tree construction.
///
/// # Errors
///
/// Returns `EmptyBatch` for no entries and `DuplicatePath` if two entries
/// share a path.
pub fn order_entries(mut entries: Vec<ManifestEntry>) -> Result<Vec<ManifestEntry>> {
    if entries.is_empty() {
        return Err(AttestationError::EmptyBatch);
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    if let Some(pair) = entries.windows(2).find(|pair| pair[0].path == pair[1].path) {
        return Err(AttestationError::DuplicatePath { path: pair[0].path.clone() });
    }
    Ok(entries)
}

/// Binary Merkle tree with odd-node promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Builds the tree over `leaves` in the given order.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::EmptyBatch` if `leaves` is empty.
    pub fn build(leaves: &[LeafHash]) -> Result<Self> {
        if leaves.is_empty() {
            return Err(AttestationError::EmptyBatch);
        }

        let mut levels = vec![leaves.to_vec()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    _ => pair[0],
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// Root hash summarising every leaf.
    pub fn root(&self) -> MerkleRoot {
        // `build` guarantees a non-empty top level.
        self.levels.last().and_then(|top| top.first()).copied().unwrap_or(Digest::ZERO)
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Leaves in tree order.
    pub fn leaves(&self) -> &[LeafHash] {
        &self.levels[0]
    }

    /// Number of levels including leaves and root.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Builds the inclusion proof for the leaf at `index`.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::IndexOutOfRange` if `index` is not a leaf.
    pub fn prove(&self, index: usize) -> Result<InclusionProof> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(AttestationError::IndexOutOfRange { index, leaf_count });
        }

        let mut steps = Vec::with_capacity(self.levels.len());
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if position % 2 == 1 {
                Some(ProofStep { sibling: level[position - 1], position: SiblingPosition::Left })
            } else {
                level
                    .get(position + 1)
                    .map(|sibling| ProofStep { sibling: *sibling, position: SiblingPosition::Right })
            };
            steps.extend(step);
            position /= 2;
        }

        Ok(InclusionProof { leaf_index: index, leaf_count, steps })
    }
}

/// Side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPosition {
    /// Sibling is the left operand.
    Left,
    /// Sibling is the right operand.
    Right,
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling hash at this level.
    pub sibling: Digest,
    /// Side the sibling sits on.
    pub position: SiblingPosition,
}

/// Sibling path from one leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Index of the proven leaf in the sorted leaf list.
    pub leaf_index: usize,
    /// Number of leaves in the tree the proof was cut from.
    pub leaf_count: usize,
    /// Sibling hashes from the leaf level upwards.
    pub steps: Vec<ProofStep>,
}

impl InclusionProof {
    /// Folds `leaf` through the proof steps.
    pub fn compute_root(&self, leaf: &LeafHash) -> MerkleRoot {
        self.steps.iter().fold(*leaf, |running, step| match step.position {
            SiblingPosition::Left => hash_pair(&step.sibling, &running),
            SiblingPosition::Right => hash_pair(&running, &step.sibling),
        })
    }

    /// Returns true if the step positions are the ones the shaping rule
    /// produces for `leaf_index` in a tree of `leaf_count` leaves.
    pub fn has_expected_shape(&self) -> bool {
        if self.leaf_index >= self.leaf_count {
            return false;
        }

        let mut expected = Vec::new();
        let (mut index, mut width) = (self.leaf_index, self.leaf_count);
        while width > 1 {
            if index % 2 == 1 {
                expected.push(SiblingPosition::Left);
            } else if index + 1 < width {
                expected.push(SiblingPosition::Right);
            }
            index /= 2;
            width = width.div_ceil(2);
        }

        self.steps.iter().map(|step| step.position).eq(expected)
    }

    /// Checks that `leaf` reaches `root` through this proof.
    ///
    /// # Errors
    ///
    /// Returns `AttestationError::ProofInvalid` on any mismatch.
    pub fn verify(&self, leaf: &LeafHash, root: &MerkleRoot) -> Result<()> {
        if verify_inclusion(leaf, self, root) {
            Ok(())
        } else {
            Err(AttestationError::ProofInvalid { expected: *root })
        }
    }
}

/// Walks `proof` from `leaf` and compares the result with `claimed_root`.
pub fn verify_inclusion(leaf: &LeafHash, proof: &InclusionProof, claimed_root: &MerkleRoot) -> bool {
    proof.has_expected_shape() && proof.compute_root(leaf) == *claimed_root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(items: &[&str]) -> Vec<LeafHash> {
        items.iter().map(|item| Digest::of(item.as_bytes())).collect()
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(MerkleTree::build(&[]), Err(AttestationError::EmptyBatch)));
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let leaf = Digest::of(b"only");
        let tree = MerkleTree::build(&[leaf]).unwrap();
        let proof = tree.prove(0).unwrap();

        assert_eq!(tree.root(), leaf);
        assert!(proof.steps.is_empty());
        assert!(verify_inclusion(&leaf, &proof, &tree.root()));
    }

    #[test]
    fn two_leaves_hash_in_order() {
        let hashes = leaves(&["a", "b"]);
        let tree = MerkleTree::build(&hashes).unwrap();

        assert_eq!(tree.root(), hash_pair(&hashes[0], &hashes[1]));
        assert_ne!(tree.root(), hash_pair(&hashes[1], &hashes[0]));
    }

    #[test]
    fn odd_node_is_promoted_not_duplicated() {
        let hashes = leaves(&["a", "b", "c"]);
        let tree = MerkleTree::build(&hashes).unwrap();

        let expected = hash_pair(&hash_pair(&hashes[0], &hashes[1]), &hashes[2]);
        assert_eq!(tree.root(), expected);

        let duplicated = hash_pair(&hash_pair(&hashes[0], &hashes[1]), &hash_pair(&hashes[2], &hashes[2]));
        assert_ne!(tree.root(), duplicated);
    }

    #[test]
    fn promoted_leaf_proof_skips_level() {
        let hashes = leaves(&["a", "b", "c"]);
        let tree = MerkleTree::build(&hashes).unwrap();
        let proof = tree.prove(2).unwrap();

        assert_eq!(proof.steps.len(), 1);
        assert_eq!(proof.steps[0].position, SiblingPosition::Left);
        assert_eq!(proof.steps[0].sibling, hash_pair(&hashes[0], &hashes[1]));
        assert!(verify_inclusion(&hashes[2], &proof, &tree.root()));
    }

    #[test]
    fn every_leaf_of_uneven_trees_verifies() {
        for count in 1..=17 {
            let hashes: Vec<_> = (0..count).map(|i: u32| Digest::of(&i.to_be_bytes())).collect();
            let tree = MerkleTree::build(&hashes).unwrap();

            for (index, leaf) in hashes.iter().enumerate() {
                let proof = tree.prove(index).unwrap();
                assert!(proof.has_expected_shape(), "shape for {index}/{count}");
                assert!(verify_inclusion(leaf, &proof, &tree.root()), "leaf {index}/{count}");
            }
        }
    }

    #[test]
    fn index_out_of_range() {
        let tree = MerkleTree::build(&leaves(&["a", "b"])).unwrap();
        assert!(matches!(
            tree.prove(2),
            Err(AttestationError::IndexOutOfRange { index: 2, leaf_count: 2 })
        ));
    }

    #[test]
    fn wrong_leaf_or_root_fails() {
        let hashes = leaves(&["a", "b", "c", "d"]);
        let tree = MerkleTree::build(&hashes).unwrap();
        let proof = tree.prove(1).unwrap();

        assert!(!verify_inclusion(&hashes[0], &proof, &tree.root()));
        assert!(!verify_inclusion(&hashes[1], &proof, &Digest::of(b"other")));
        assert!(matches!(
            proof.verify(&hashes[0], &tree.root()),
            Err(AttestationError::ProofInvalid { .. })
        ));
    }

    #[test]
    fn relabelled_proof_fails_shape_check() {
        let hashes = leaves(&["a", "b", "c", "d"]);
        let tree = MerkleTree::build(&hashes).unwrap();
        let mut proof = tree.prove(1).unwrap();

        proof.leaf_index = 0;
        assert!(!verify_inclusion(&hashes[1], &proof, &tree.root()));
    }

    #[test]
    fn order_entries_sorts_and_rejects_duplicates() {
        let entry = |path: &str| ManifestEntry {
            path: path.to_string(),
            leaf_hash: Digest::of(path.as_bytes()),
            size: 1,
        };

        let ordered = order_entries(vec![entry("c"), entry("a"), entry("b")]).unwrap();
        let paths: Vec<_> = ordered.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["a", "b", "c"]);

        assert!(matches!(
            order_entries(vec![entry("a"), entry("b"), entry("a")]),
            Err(AttestationError::DuplicatePath { path }) if path == "a"
        ));
        assert!(matches!(order_entries(Vec::new()), Err(AttestationError::EmptyBatch)));
    }

    #[test]
    fn proof_json_shape() {
        let tree = MerkleTree::build(&leaves(&["a", "b"])).unwrap();
        let value = serde_json::to_value(tree.prove(0).unwrap()).unwrap();

        assert_eq!(value["leaf_index"], 0);
        assert_eq!(value["leaf_count"], 2);
        assert_eq!(value["steps"][0]["position"], "right");
    }
}
