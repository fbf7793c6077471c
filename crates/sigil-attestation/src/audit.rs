//! Append-only CSV audit trail of sealing and anchoring.
//!
//! One row per event, columns `timestamp,artifact,digest,stage,batch_id,detail`.
//! The file is only ever appended to; a header is written when it is new.

use std::{
    fmt,
    fs::OpenOptions,
    io::Write as _,
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use sigil_core::Digest;

use crate::error::{AttestationError, Result};

/// Header row of the audit file.
pub const AUDIT_HEADER: &str = "timestamp,artifact,digest,stage,batch_id,detail";

/// Pipeline stage an audit row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStage {
    /// A batch was sealed locally.
    Seal,
    /// A batch root was anchored (or found already anchored).
    Anchor,
}

impl fmt::Display for AuditStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seal => write!(f, "seal"),
            Self::Anchor => write!(f, "anchor"),
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Artifact or manifest the row is about.
    pub artifact: String,
    /// Digest recorded for it.
    pub digest: Digest,
    /// Pipeline stage.
    pub stage: AuditStage,
    /// Batch identifier.
    pub batch_id: String,
    /// Free-form outcome detail.
    pub detail: String,
}

impl AuditEntry {
    fn to_row(&self) -> String {
        [
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            escape(&self.artifact),
            self.digest.to_prefixed(),
            self.stage.to_string(),
            escape(&self.batch_id),
            escape(&self.detail),
        ]
        .join(",")
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Audit file handle.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    path: PathBuf,
}

impl AuditTrail {
    /// Default location relative to the working directory.
    pub const DEFAULT_PATH: &'static str = "ledger/attestation_ledger.csv";

    /// Creates a handle for the audit file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the audit file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entries`, creating the file and its parent directories if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be opened or written.
    pub fn append(&self, entries: &[AuditEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AttestationError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AttestationError::io(&self.path, e))?;
        let is_new = file.metadata().map_err(|e| AttestationError::io(&self.path, e))?.len() == 0;

        let mut buf = String::new();
        if is_new {
            buf.push_str(AUDIT_HEADER);
            buf.push('\n');
        }
        for entry in entries {
            buf.push_str(&entry.to_row());
            buf.push('\n');
        }

        file.write_all(buf.as_bytes()).map_err(|e| AttestationError::io(&self.path, e))
    }
}
