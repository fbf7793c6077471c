//! On-disk artifact fixtures.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use sigil_core::AttestationDate;
use tempfile::TempDir;

/// Artifacts used by the end-to-end scenario.
pub const SCENARIO_ARTIFACTS: [(&str, &str); 4] =
    [("a", "hello"), ("b", "world"), ("c", "foo"), ("d", "bar")];

/// Batch identifier used by the end-to-end scenario.
pub const SCENARIO_BATCH_ID: &str = "build-7";

/// Anchor date used by the end-to-end scenario.
pub fn scenario_date() -> Result<AttestationDate> {
    Ok(AttestationDate::from_ymd(2025, 8, 25)?)
}

/// Temporary directory of artifacts, removed on drop.
#[derive(Debug)]
pub struct ArtifactDir {
    dir: TempDir,
}

impl ArtifactDir {
    /// Creates an empty artifact directory.
    pub fn new() -> Result<Self> {
        Ok(Self { dir: TempDir::new().context("failed to create artifact dir")? })
    }

    /// Creates a directory holding `files` as `(relative path, content)`.
    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Result<Self>
    where
        P: AsRef<Path>,
        C: AsRef<[u8]>,
    {
        let dir = Self::new()?;
        for (path, content) in files {
            dir.write(path, content)?;
        }
        Ok(dir)
    }

    /// Creates the scenario artifacts `a`..`d`.
    pub fn scenario() -> Result<Self> {
        Self::with_files(SCENARIO_ARTIFACTS)
    }

    /// Root of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `content` to `relative`, creating parent directories.
    pub fn write(&self, relative: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Reads the artifact at `relative`.
    pub fn read(&self, relative: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = self.dir.path().join(relative);
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }
}
