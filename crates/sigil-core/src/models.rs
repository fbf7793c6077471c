//! Core domain models and strongly-typed identifiers.
//!
//! Defines content digests, fingerprint keys, publisher addresses,
//! attestation dates and the write-once record stored on the ledger. Every
//! type that crosses a file or wire boundary serialises as a plain string so
//! manifests and RPC payloads stay human-readable.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::{encoding, error::CoreError};

/// Prefix used when a digest is rendered with its algorithm name.
pub const DIGEST_PREFIX: &str = "sha256:";

/// A 32-byte SHA-256 digest.
///
/// Used for artifact leaf hashes, Merkle roots, and transaction hashes.
/// Serialises as 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest(pub [u8; 32]);

/// Content hash of a single artifact.
pub type LeafHash = Digest;

/// Root hash summarising an ordered batch of leaves.
pub type MerkleRoot = Digest;

/// Hash identifying a submitted ledger transaction.
pub type TxHash = Digest;

impl Digest {
    /// The all-zero digest, which the ledger treats as "no root".
    pub const ZERO: Self = Self([0u8; 32]);

    /// Computes the SHA-256 digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns true for the all-zero digest.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Lowercase hex encoding without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hex encoding with the `sha256:` algorithm prefix.
    pub fn to_prefixed(&self) -> String {
        format!("{DIGEST_PREFIX}{}", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl FromStr for Digest {
    type Err = CoreError;

    /// Parses either bare hex or the `sha256:`-prefixed form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(DIGEST_PREFIX).unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| CoreError::invalid_hex("digest", e))?;
        let array: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CoreError::InvalidLength { field: "digest", expected: 32, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encoding::serialize_display(self, serializer)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        encoding::deserialize_from_str(deserializer)
    }
}

/// Key identifying a logical attestation stream, such as one project.
///
/// Operators configure a human-readable label; the ledger only ever sees
/// its SHA-256 hash. A fingerprint outlives any single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintKey(pub Digest);

impl FingerprintKey {
    /// Derives the fingerprint key from its configured label.
    pub fn from_label(label: &str) -> Self {
        Self(Digest::of(label.as_bytes()))
    }

    /// Returns the underlying digest.
    pub const fn digest(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for FingerprintKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Ledger identity of a signer: the first 20 bytes of SHA-256 over its
/// Ed25519 public key. Displayed as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Derives the address that owns `public_key`.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let hash = Sha256::digest(public_key);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[..20]);
        Self(bytes)
    }

    /// Returns the raw address bytes.
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| CoreError::invalid_hex("address", e))?;
        let array: [u8; 20] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CoreError::InvalidLength { field: "address", expected: 20, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encoding::serialize_display(self, serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        encoding::deserialize_from_str(deserializer)
    }
}

/// Calendar day (UTC) an attestation record is filed under.
///
/// Displayed as `YYYY-MM-DD`; the ledger keys records by the compact
/// integer form `YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttestationDate(NaiveDate);

impl AttestationDate {
    /// Creates a date from its calendar components.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDate` for impossible dates.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self, CoreError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| CoreError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))
    }

    /// Returns the UTC calendar day of `timestamp`.
    pub fn from_datetime(timestamp: &DateTime<Utc>) -> Self {
        Self(timestamp.date_naive())
    }

    /// Compact `YYYYMMDD` integer used as the on-ledger key component.
    pub fn as_compact(&self) -> u32 {
        // Years before 0 cannot be produced by the parsers below.
        let year = u32::try_from(self.0.year()).unwrap_or(0);
        year * 10_000 + self.0.month() * 100 + self.0.day()
    }

    /// Parses the compact `YYYYMMDD` form.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDate` if the components do not form a date.
    pub fn from_compact(value: u32) -> Result<Self, CoreError> {
        let year = i32::try_from(value / 10_000)
            .map_err(|_| CoreError::InvalidDate(value.to_string()))?;
        Self::from_ymd(year, (value / 100) % 100, value % 100)
    }

    /// Returns the underlying calendar date.
    pub const fn naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for AttestationDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for AttestationDate {
    type Err = CoreError;

    /// Accepts `YYYY-MM-DD` or compact `YYYYMMDD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self(date));
        }
        if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
            let value: u32 = s.parse().map_err(|_| CoreError::InvalidDate(s.to_string()))?;
            return Self::from_compact(value);
        }
        Err(CoreError::InvalidDate(s.to_string()))
    }
}

impl Serialize for AttestationDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encoding::serialize_display(self, serializer)
    }
}

impl<'de> Deserialize<'de> for AttestationDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        encoding::deserialize_from_str(deserializer)
    }
}

/// Ledger key of one attestation record: a stream and a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Attestation stream the record belongs to.
    pub fingerprint: FingerprintKey,
    /// Day the record is filed under.
    pub date: AttestationDate,
}

impl RecordKey {
    /// Creates a record key.
    pub const fn new(fingerprint: FingerprintKey, date: AttestationDate) -> Self {
        Self { fingerprint, date }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.fingerprint, self.date)
    }
}

/// Write-once record stored on the ledger for one `RecordKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRecord {
    /// Merkle root of the anchored batch.
    pub root: MerkleRoot,
    /// Identifier of the anchored batch.
    pub batch_id: String,
    /// Ledger time at which the record was accepted.
    pub timestamp: DateTime<Utc>,
    /// Identity that wrote the record.
    pub publisher: Address,
}
