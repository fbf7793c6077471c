//! Sigil command line.
//!
//! Seals artifact directories into Merkle manifests, anchors manifest roots
//! on the ledger, and verifies artifacts against manifest, proof and ledger
//! state. Results go to stdout; logs go to stderr.

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sigil::{exit_code, App, Config, GeneratedIdentity};
use sigil_core::{Address, AttestationDate};
use tracing::{debug, error};

#[derive(Debug, Parser)]
#[command(name = "sigil", version, about = "Seal build artifacts and anchor their Merkle roots on a ledger")]
struct Cli {
    /// Configuration file layered under `SIGIL_*` environment variables.
    #[arg(long, global = true, env = "SIGIL_CONFIG", default_value = sigil::config::CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Hash every file under a directory and write a manifest.
    Seal {
        /// Directory to seal.
        dir: PathBuf,
        /// Batch identifier; generated when omitted.
        #[arg(long)]
        batch_id: Option<String>,
        /// Manifest output path (default `<batch-id>.manifest.json`).
        #[arg(long)]
        out: Option<PathBuf>,
        /// Also write one proof bundle per artifact under this directory.
        #[arg(long)]
        proofs: Option<PathBuf>,
    },
    /// Anchor a manifest root on the ledger. Safe to re-run.
    Anchor {
        /// Manifest to anchor.
        manifest: PathBuf,
        /// Fingerprint label or hex key (default from config).
        #[arg(long)]
        fingerprint: Option<String>,
        /// Attestation date (default: the manifest's creation date).
        #[arg(long)]
        date: Option<AttestationDate>,
    },
    /// Produce the inclusion proof for one artifact of a manifest.
    Prove {
        /// Manifest listing the artifact.
        manifest: PathBuf,
        /// Artifact path as recorded in the manifest.
        path: String,
        /// Write the proof bundle here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Verify an artifact. Exit 0 verified, 1 hash/proof failure, 2 not
    /// anchored, 3 ledger error, 4 local input error.
    Verify {
        /// Artifact file.
        artifact: PathBuf,
        /// Manifest the artifact was sealed in.
        manifest: PathBuf,
        /// Proof bundle for the artifact.
        proof: PathBuf,
        /// Fingerprint label or hex key (default from config).
        #[arg(long)]
        fingerprint: Option<String>,
        /// Attestation date (default: the manifest's creation date).
        #[arg(long)]
        date: Option<AttestationDate>,
    },
    /// Show the ledger record for a fingerprint and date.
    Record {
        /// Fingerprint label or hex key.
        fingerprint: String,
        /// Attestation date, `YYYY-MM-DD`.
        date: AttestationDate,
    },
    /// Register the publisher for a fingerprint (owner key required).
    RegisterPublisher {
        /// Fingerprint label or hex key.
        fingerprint: String,
        /// Publisher address, `0x`-prefixed hex.
        address: Address,
    },
    /// Print the configured signing address.
    Identity {
        /// Generate a new keypair and print its address and secret key.
        #[arg(long)]
        generate: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(4);
        },
    };

    init_tracing(&config.rust_log);
    debug!(config = ?config, "configuration loaded");

    match run(cli.command, config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(u8::try_from(exit_code(&e)).unwrap_or(1))
        },
    }
}

async fn run(command: Command, config: Config) -> Result<u8> {
    if let Command::Identity { generate: true } = command {
        let generated = GeneratedIdentity::generate();
        println!("{generated}");
        eprintln!("keep the signing key secret; set it as SIGIL_SIGNING_KEY or signing_key in sigil.toml");
        return Ok(0);
    }

    let app = App::connect(config)?;

    match command {
        Command::Seal { dir, batch_id, out, proofs } => {
            let batch_id =
                batch_id.unwrap_or_else(|| format!("batch-{}", uuid::Uuid::new_v4().simple()));
            let report = app.seal(&dir, &batch_id, out.as_deref(), proofs.as_deref()).await?;
            let manifest = &report.batch.manifest;

            for skipped in &manifest.diagnostics.skipped {
                eprintln!("skipped {}: {}", skipped.path, skipped.reason);
            }
            println!(
                "SEALED {} artifacts as {} root {}",
                manifest.entries.len(),
                manifest.batch_id,
                manifest.root
            );
            println!("manifest: {}", report.manifest_path.display());
            if !report.proof_paths.is_empty() {
                println!("proofs: {}", report.proof_paths.len());
            }
            Ok(0)
        },
        Command::Anchor { manifest, fingerprint, date } => {
            let report = app.anchor(&manifest, fingerprint.as_deref(), date).await?;
            println!("{report}");
            Ok(if report.root_matches() { 0 } else { 2 })
        },
        Command::Prove { manifest, path, out } => {
            let bundle = app.prove(&manifest, &path, out.as_deref())?;
            match out {
                Some(out) => println!("proof written to {}", out.display()),
                None => println!(
                    "{}",
                    serde_json::to_string_pretty(&bundle).context("failed to encode proof")?
                ),
            }
            Ok(0)
        },
        Command::Verify { artifact, manifest, proof, fingerprint, date } => {
            let verdict = app.verify(&artifact, &manifest, &proof, fingerprint.as_deref(), date).await?;
            println!("{verdict}");
            Ok(u8::try_from(verdict.exit_code()).unwrap_or(1))
        },
        Command::Record { fingerprint, date } => {
            match app.record(&fingerprint, date).await? {
                Some(record) => println!(
                    "{}",
                    serde_json::to_string_pretty(&record).context("failed to encode record")?
                ),
                None => println!("no record"),
            }
            Ok(0)
        },
        Command::RegisterPublisher { fingerprint, address } => {
            let receipt = app.register_publisher(&fingerprint, address).await?;
            println!("publisher {address} registered in tx {} at height {}", receipt.tx_hash, receipt.height);
            Ok(0)
        },
        Command::Identity { .. } => {
            println!("{}", app.identity()?);
            Ok(0)
        },
    }
}

/// Initializes tracing on stderr. `RUST_LOG` wins over the configured level.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
