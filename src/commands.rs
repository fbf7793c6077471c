//! Command implementations behind the CLI.
//!
//! Each command returns a typed result; printing and exit codes are left to
//! `main`. Ledger failures surface as `LedgerError` inside the `anyhow`
//! chain so [`exit_code`] can tell them apart from local input errors.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use sigil_attestation::{
    AuditEntry, AuditStage, Manifest, ProofBundle, SealedBatch, Sealer, SigningIdentity, Verdict,
    VerificationService,
};
use sigil_core::{
    Address, AttestationDate, AttestationRecord, Clock, FingerprintKey, LedgerError,
    LedgerGateway, RealClock, RecordKey, TransactionSigner, TxReceipt,
};
use sigil_ledger::{AttestOutcome, AttestationClient, RpcLedgerGateway};
use tracing::{info, warn};

use crate::config::Config;

/// Exit code for ledger or network failures.
pub const EXIT_LEDGER_ERROR: i32 = 3;

/// Exit code for local input errors (unreadable files, bad arguments).
pub const EXIT_LOCAL_ERROR: i32 = 4;

/// Maps a command failure to a process exit code.
pub fn exit_code(error: &anyhow::Error) -> i32 {
    if error.chain().any(|cause| cause.is::<LedgerError>()) {
        EXIT_LEDGER_ERROR
    } else {
        EXIT_LOCAL_ERROR
    }
}

/// Interprets a fingerprint argument: a 64-character hex key (optionally
/// `sha256:`-prefixed) is taken as-is, anything else is a label.
pub fn parse_fingerprint(value: &str) -> FingerprintKey {
    value.parse().unwrap_or_else(|_| FingerprintKey::from_label(value))
}

/// Outcome of `seal`.
#[derive(Debug)]
pub struct SealReport {
    /// The sealed batch.
    pub batch: SealedBatch,
    /// Where the manifest was written.
    pub manifest_path: PathBuf,
    /// Proof bundles written, if requested.
    pub proof_paths: Vec<PathBuf>,
}

/// Outcome of `anchor`.
#[derive(Debug)]
pub struct AnchorReport {
    /// Ledger key the root was anchored under.
    pub key: RecordKey,
    /// Root of the anchored manifest.
    pub root: sigil_core::MerkleRoot,
    /// Client outcome.
    pub outcome: AttestOutcome,
}

impl AnchorReport {
    /// Returns false when the key already held a different root.
    pub fn root_matches(&self) -> bool {
        self.outcome.root_matches(&self.root)
    }
}

impl fmt::Display for AnchorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.outcome.record();
        match &self.outcome {
            AttestOutcome::Attested { tx_hash, confirmations, .. } => write!(
                f,
                "ATTESTED {} root {} in tx {} ({} confirmations)",
                self.key, record.root, tx_hash, confirmations
            ),
            AttestOutcome::Landed { tx_hash, .. } => {
                write!(f, "LANDED {} root {} in tx {} (confirmation wait ended early)", self.key, record.root, tx_hash)
            },
            AttestOutcome::AlreadyAttested { .. } if self.root_matches() => {
                write!(f, "ALREADY ATTESTED {} root {} (batch {})", self.key, record.root, record.batch_id)
            },
            AttestOutcome::AlreadyAttested { .. } => write!(
                f,
                "ALREADY ATTESTED {} with a different root {} (batch {}); manifest root {} is not anchored",
                self.key, record.root, record.batch_id, self.root
            ),
        }
    }
}

/// Freshly generated signing key, printed once by `identity --generate`.
pub struct GeneratedIdentity {
    /// Ledger address derived from the public key.
    pub address: Address,
    /// Hex-encoded secret key, suitable for `SIGIL_SIGNING_KEY`.
    pub signing_key: String,
}

impl GeneratedIdentity {
    /// Generates a new random keypair.
    pub fn generate() -> Self {
        let identity = SigningIdentity::ephemeral();
        Self { address: identity.address(), signing_key: identity.secret_hex() }
    }
}

impl fmt::Debug for GeneratedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedIdentity")
            .field("address", &self.address)
            .field("signing_key", &"***")
            .finish()
    }
}

impl fmt::Display for GeneratedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "address: {}", self.address)?;
        write!(f, "signing_key: 0x{}", self.signing_key)
    }
}

/// Wires configuration, ledger gateway and clock together.
#[derive(Clone)]
pub struct App {
    config: Config,
    gateway: Arc<dyn LedgerGateway>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("config", &self.config).finish_non_exhaustive()
    }
}

impl App {
    /// Creates an app over an explicit gateway and clock.
    pub fn new(config: Config, gateway: Arc<dyn LedgerGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { config, gateway, clock }
    }

    /// Creates an app talking JSON-RPC to the configured ledger node.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn connect(config: Config) -> Result<Self> {
        let gateway = RpcLedgerGateway::new(config.to_gateway_config())
            .context("failed to create ledger gateway")?;
        Ok(Self::new(config, Arc::new(gateway), Arc::new(RealClock::new())))
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn client(&self) -> Result<AttestationClient> {
        let signer: Arc<dyn TransactionSigner> = Arc::new(self.config.signing_identity()?);
        Ok(AttestationClient::new(
            Arc::clone(&self.gateway),
            signer,
            Arc::clone(&self.clock),
            self.config.to_client_config(),
        ))
    }

    fn fingerprint(&self, fingerprint: Option<&str>) -> FingerprintKey {
        parse_fingerprint(fingerprint.unwrap_or(&self.config.fingerprint))
    }

    fn audit(&self, entries: &[AuditEntry]) {
        // The audit file is a local convenience; its failure never fails a command.
        if let Err(e) = self.config.audit_trail().append(entries) {
            warn!(error = %e, path = %self.config.audit_log_path, "failed to append audit rows");
        }
    }

    /// Seals every file under `dir`, writes the manifest (never
    /// overwriting) and optionally one proof bundle per artifact.
    ///
    /// # Errors
    ///
    /// Fails if nothing could be hashed or the manifest already exists.
    pub async fn seal(
        &self,
        dir: &Path,
        batch_id: &str,
        out: Option<&Path>,
        proofs: Option<&Path>,
    ) -> Result<SealReport> {
        let batch = Sealer::new(self.config.hash_concurrency)
            .with_clock(Arc::clone(&self.clock))
            .seal(dir, batch_id)
            .await
            .with_context(|| format!("failed to seal {}", dir.display()))?;

        let manifest_path =
            out.map_or_else(|| PathBuf::from(format!("{batch_id}.manifest.json")), Path::to_path_buf);
        batch.manifest.write_new(&manifest_path)?;

        let proof_paths = match proofs {
            Some(dir) => batch.write_proofs(dir)?,
            None => Vec::new(),
        };

        let manifest = &batch.manifest;
        let mut rows: Vec<AuditEntry> = manifest
            .entries
            .iter()
            .map(|entry| AuditEntry {
                timestamp: manifest.created_at,
                artifact: entry.path.clone(),
                digest: entry.leaf_hash,
                stage: AuditStage::Seal,
                batch_id: manifest.batch_id.clone(),
                detail: format!("{} bytes", entry.size),
            })
            .collect();
        rows.push(AuditEntry {
            timestamp: manifest.created_at,
            artifact: manifest_path.display().to_string(),
            digest: manifest.root,
            stage: AuditStage::Seal,
            batch_id: manifest.batch_id.clone(),
            detail: format!("root of {} artifacts, {} skipped", manifest.entries.len(), manifest.diagnostics.skipped.len()),
        });
        self.audit(&rows);

        info!(manifest = %manifest_path.display(), root = %manifest.root, "manifest written");
        Ok(SealReport { batch, manifest_path, proof_paths })
    }

    /// Anchors the root of the manifest at `manifest_path`.
    ///
    /// The date defaults to the manifest's creation day so re-runs on a
    /// later day hit the same key.
    ///
    /// # Errors
    ///
    /// Local errors for an unreadable or inconsistent manifest or a missing
    /// signing key; `LedgerError` for ledger failures.
    pub async fn anchor(
        &self,
        manifest_path: &Path,
        fingerprint: Option<&str>,
        date: Option<AttestationDate>,
    ) -> Result<AnchorReport> {
        let manifest = load_manifest(manifest_path)?;
        manifest
            .validate()
            .with_context(|| format!("manifest {} failed integrity check", manifest_path.display()))?;

        let fingerprint = self.fingerprint(fingerprint);
        let date = date.unwrap_or_else(|| manifest.attestation_date());
        let client = self.client()?;

        let outcome = client.submit(fingerprint, date, manifest.root, &manifest.batch_id).await?;
        let report = AnchorReport { key: RecordKey::new(fingerprint, date), root: manifest.root, outcome };

        if !report.root_matches() {
            warn!(key = %report.key, anchored = %report.outcome.record().root, root = %manifest.root, "key already holds a different root");
        }

        let detail = match report.outcome.tx_hash() {
            Some(tx_hash) => format!("{} {} tx {}", report.outcome.kind(), report.key, tx_hash),
            None => format!("{} {}", report.outcome.kind(), report.key),
        };
        self.audit(&[AuditEntry {
            timestamp: self.clock.now_utc(),
            artifact: manifest_path.display().to_string(),
            digest: manifest.root,
            stage: AuditStage::Anchor,
            batch_id: manifest.batch_id.clone(),
            detail,
        }]);

        Ok(report)
    }

    /// Builds the proof bundle for `path` and writes it to `out` if given.
    ///
    /// # Errors
    ///
    /// Fails if the manifest cannot be read or does not list `path`.
    pub fn prove(&self, manifest_path: &Path, path: &str, out: Option<&Path>) -> Result<ProofBundle> {
        let manifest = load_manifest(manifest_path)?;
        let bundle = manifest
            .prove(path)
            .with_context(|| format!("cannot prove {path} from {}", manifest_path.display()))?;
        if let Some(out) = out {
            bundle.write(out)?;
        }
        Ok(bundle)
    }

    /// Verifies `artifact` against its manifest, proof and the ledger.
    ///
    /// # Errors
    ///
    /// Local errors for unreadable inputs; `LedgerError` if the ledger read
    /// fails. Every other outcome is a `Verdict`.
    pub async fn verify(
        &self,
        artifact: &Path,
        manifest_path: &Path,
        proof_path: &Path,
        fingerprint: Option<&str>,
        date: Option<AttestationDate>,
    ) -> Result<Verdict> {
        let content = tokio::fs::read(artifact)
            .await
            .with_context(|| format!("failed to read artifact {}", artifact.display()))?;
        let manifest = load_manifest(manifest_path)?;
        let bundle = ProofBundle::load(proof_path)
            .with_context(|| format!("failed to read proof {}", proof_path.display()))?;

        let key = RecordKey::new(
            self.fingerprint(fingerprint),
            date.unwrap_or_else(|| manifest.attestation_date()),
        );
        let verdict = VerificationService::new(Arc::clone(&self.gateway))
            .verify_bundle(&content, &manifest, &bundle, &key)
            .await?;
        Ok(verdict)
    }

    /// Reads the ledger record for a fingerprint and date.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError` if the read fails.
    pub async fn record(&self, fingerprint: &str, date: AttestationDate) -> Result<Option<AttestationRecord>> {
        let key = RecordKey::new(parse_fingerprint(fingerprint), date);
        Ok(self.gateway.get_record(&key).await?)
    }

    /// Registers `publisher` for `fingerprint` using the configured (owner)
    /// identity.
    ///
    /// # Errors
    ///
    /// Returns `Rejected { NotOwner }` if the configured key is not the
    /// ledger owner.
    pub async fn register_publisher(&self, fingerprint: &str, publisher: Address) -> Result<TxReceipt> {
        let receipt = self.client()?.set_publisher(parse_fingerprint(fingerprint), publisher).await?;
        Ok(receipt)
    }

    /// Address of the configured signing identity.
    ///
    /// # Errors
    ///
    /// Fails if no valid signing key is configured.
    pub fn identity(&self) -> Result<Address> {
        Ok(self.config.signing_identity()?.address())
    }
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("failed to read manifest {}", path.display()))
}
