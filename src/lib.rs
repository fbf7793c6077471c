//! Sigil: seal build artifacts into Merkle batches and anchor their roots
//! on a public ledger.
//!
//! The binary is a thin clap front end over [`App`], which wires the
//! configured gateway, signing identity and clock into the attestation and
//! ledger crates. Integration tests drive `App` directly against an
//! in-memory ledger.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod config;

pub use commands::{
    exit_code, parse_fingerprint, AnchorReport, App, GeneratedIdentity, SealReport,
};
pub use config::Config;
