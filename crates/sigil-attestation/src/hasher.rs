//! Canonical content hashing of build artifacts.
//!
//! A leaf hash is SHA-256 over the artifact bytes and nothing else: paths,
//! permissions and timestamps never enter the hash, so two artifacts with
//! identical content share a leaf hash regardless of where they live.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use sigil_core::{Digest, LeafHash};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, warn};

use crate::{
    error::{AttestationError, Result},
    manifest::{ManifestEntry, SkippedArtifact},
};

/// Hashes raw artifact bytes.
pub fn hash_bytes(content: &[u8]) -> LeafHash {
    Digest::of(content)
}

/// Build artifact loaded fully into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: String,
    content: Bytes,
}

impl Artifact {
    /// Creates an artifact from in-memory content.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if `path` is absolute or escapes its root.
    pub fn new(path: impl AsRef<Path>, content: impl Into<Bytes>) -> Result<Self> {
        Ok(Self { path: normalize_path(path.as_ref())?, content: content.into() })
    }

    /// Reads `relative` under `root` in full.
    ///
    /// # Errors
    ///
    /// Returns `UnreadableArtifact` if the file cannot be read or the
    /// number of bytes read disagrees with the file's metadata length.
    pub fn read(root: &Path, relative: &Path) -> Result<Self> {
        let path = normalize_path(relative)?;
        let full = root.join(relative);

        let expected = std::fs::metadata(&full)
            .map_err(|e| AttestationError::unreadable(&path, e))?
            .len();
        let content = std::fs::read(&full).map_err(|e| AttestationError::unreadable(&path, e))?;

        if content.len() as u64 != expected {
            return Err(AttestationError::unreadable(
                &path,
                format!("read {} of {expected} bytes", content.len()),
            ));
        }

        Ok(Self { path, content: Bytes::from(content) })
    }

    /// Path relative to the sealed root, `/`-separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw content.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Content length in bytes.
    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    /// Returns true for zero-length artifacts.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Leaf hash of the content.
    pub fn leaf_hash(&self) -> LeafHash {
        hash_bytes(&self.content)
    }

    /// Manifest entry describing this artifact.
    pub fn to_entry(&self) -> ManifestEntry {
        ManifestEntry { path: self.path.clone(), leaf_hash: self.leaf_hash(), size: self.len() }
    }
}

/// Normalises a relative artifact path to `/` separators.
///
/// `.` components are dropped.
///
/// # Errors
///
/// Returns `InvalidPath` for absolute paths, `..` components, or an empty
/// result.
pub fn normalize_path(path: &Path) -> Result<String> {
    let invalid = || AttestationError::InvalidPath { path: path.display().to_string() };

    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(invalid)?),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid());
            },
        }
    }

    if parts.is_empty() {
        return Err(invalid());
    }
    Ok(parts.join("/"))
}

/// Outcome of hashing a directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashReport {
    /// Successfully hashed artifacts, sorted by path.
    pub leaves: Vec<ManifestEntry>,
    /// Artifacts that could not be read, sorted by path.
    pub skipped: Vec<SkippedArtifact>,
}

/// Hashes every regular file under `root` with at most `concurrency`
/// reads in flight.
///
/// Symlinks are not followed. Unreadable files and files whose names are
/// not valid UTF-8 are recorded in `HashReport::skipped` and do not abort
/// the batch.
///
/// # Errors
///
/// Returns `Io` if `root` itself cannot be listed.
pub async fn hash_directory(root: &Path, concurrency: usize) -> Result<HashReport> {
    let root = root.to_path_buf();
    let walk_root = root.clone();
    let listing = tokio::task::spawn_blocking(move || list_files(&walk_root))
        .await
        .map_err(|e| AttestationError::io(&root, std::io::Error::other(e)))??;

    let mut report = HashReport { leaves: Vec::new(), skipped: listing.unlistable };
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for relative in listing.files {
        let permits = Arc::clone(&permits);
        let root = root.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let display = relative.display().to_string();
            tokio::task::spawn_blocking(move || Artifact::read(&root, &relative).map(|a| a.to_entry()))
                .await
                .unwrap_or_else(|e| Err(AttestationError::unreadable(display, e)))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(entry)) => {
                debug!(path = %entry.path, leaf_hash = %entry.leaf_hash, size = entry.size, "hashed artifact");
                report.leaves.push(entry);
            },
            Ok(Err(e)) if e.is_per_artifact() => {
                let skipped = skipped_artifact(e);
                warn!(path = %skipped.path, reason = %skipped.reason, "skipping artifact");
                report.skipped.push(skipped);
            },
            Ok(Err(other)) => return Err(other),
            Err(join_error) => {
                warn!(error = %join_error, "hashing task failed");
                report.skipped.push(SkippedArtifact {
                    path: String::from("<unknown>"),
                    reason: join_error.to_string(),
                });
            },
        }
    }

    report.leaves.sort_by(|a, b| a.path.cmp(&b.path));
    report.skipped.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(report)
}

fn skipped_artifact(error: AttestationError) -> SkippedArtifact {
    match error {
        AttestationError::UnreadableArtifact { path, reason } => SkippedArtifact { path, reason },
        // The walker only yields relative normal components, so a rejected
        // path here is one that is not valid UTF-8.
        AttestationError::InvalidPath { path } => {
            SkippedArtifact { path, reason: String::from("path is not valid UTF-8") }
        },
        other => SkippedArtifact { path: String::from("<unknown>"), reason: other.to_string() },
    }
}

struct Listing {
    files: Vec<PathBuf>,
    unlistable: Vec<SkippedArtifact>,
}

fn list_files(root: &Path) -> Result<Listing> {
    let mut listing = Listing { files: Vec::new(), unlistable: Vec::new() };
    let mut pending = vec![PathBuf::new()];
    let mut at_root = true;

    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(root.join(&dir)) {
            Ok(entries) => entries,
            Err(e) if at_root => return Err(AttestationError::io(root, e)),
            Err(e) => {
                listing.unlistable.push(SkippedArtifact {
                    path: dir.to_string_lossy().replace('\\', "/"),
                    reason: e.to_string(),
                });
                continue;
            },
        };
        at_root = false;

        for entry in entries {
            let entry = entry.map_err(|e| AttestationError::io(root.join(&dir), e))?;
            let relative = dir.join(entry.file_name());
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    listing.unlistable.push(SkippedArtifact {
                        path: relative.to_string_lossy().replace('\\', "/"),
                        reason: e.to_string(),
                    });
                    continue;
                },
            };

            if file_type.is_dir() {
                pending.push(relative);
            } else if file_type.is_file() {
                listing.files.push(relative);
            }
        }
    }

    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_path() {
        let a = Artifact::new("a.txt", &b"same"[..]).unwrap();
        let b = Artifact::new("dir/b.bin", &b"same"[..]).unwrap();

        assert_eq!(a.leaf_hash(), b.leaf_hash());
        assert_eq!(a.leaf_hash(), Digest::of(b"same"));
    }

    #[test]
    fn normalize_rejects_escaping_paths() {
        assert_eq!(normalize_path(Path::new("./dist//app.tar")).unwrap(), "dist/app.tar");
        assert!(normalize_path(Path::new("../secret")).is_err());
        assert!(normalize_path(Path::new("/etc/passwd")).is_err());
        assert!(normalize_path(Path::new(".")).is_err());
    }

    #[test]
    fn read_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = Artifact::read(dir.path(), Path::new("missing.bin")).unwrap_err();

        assert!(matches!(err, AttestationError::UnreadableArtifact { ref path, .. } if path == "missing.bin"));
    }

    #[tokio::test]
    async fn hash_directory_walks_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "world").unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("nested/deeper/c.txt"), "foo").unwrap();

        let report = hash_directory(dir.path(), 2).await.unwrap();
        let paths: Vec<_> = report.leaves.iter().map(|e| e.path.as_str()).collect();

        assert_eq!(paths, ["a.txt", "b.txt", "nested/deeper/c.txt"]);
        assert_eq!(report.leaves[0].leaf_hash, Digest::of(b"hello"));
        assert_eq!(report.leaves[0].size, 5);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn hash_directory_fails_for_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_directory(&dir.path().join("nope"), 4).await.unwrap_err();
        assert!(matches!(err, AttestationError::Io { .. }));
    }
}
