//! Proptest strategies for artifacts and leaves.

use std::collections::BTreeMap;

use proptest::{collection, prelude::*};
use sigil_core::{Digest, LeafHash};

/// Arbitrary artifact content up to 4 KiB.
pub fn artifact_content() -> impl Strategy<Value = Vec<u8>> {
    collection::vec(any::<u8>(), 0..4096)
}

/// Between 1 and `max` arbitrary leaf hashes.
pub fn leaf_hashes(max: usize) -> impl Strategy<Value = Vec<LeafHash>> {
    collection::vec(any::<[u8; 32]>().prop_map(Digest::from_bytes), 1..=max.max(1))
}

/// Relative artifact path with up to two directory levels.
pub fn artifact_path() -> impl Strategy<Value = String> {
    "[a-z0-9_]{1,8}(/[a-z0-9_]{1,8}){0,2}(\\.[a-z]{1,3})?"
}

/// Non-empty set of artifacts keyed by unique path.
///
/// Paths never prefix one another as directories, so every entry can be
/// written to disk.
pub fn artifact_set(max: usize) -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    collection::btree_map(artifact_path(), collection::vec(any::<u8>(), 0..256), 1..=max.max(1))
        .prop_filter("paths must not shadow directories", |set| {
            set.keys().all(|path| {
                let prefix = format!("{path}/");
                !set.keys().any(|other| other.starts_with(&prefix))
            })
        })
}
