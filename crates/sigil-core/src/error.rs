//! Error taxonomy for ledger interaction and primitive parsing.
//!
//! `LedgerError` classifies every failure the attestation client can see
//! when talking to the ledger, so callers can decide between retrying,
//! surfacing immediately, or reconciling. `RejectReason` enumerates the
//! refusals the ledger state machine itself produces.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Address, FingerprintKey, TxHash};

/// Result type alias using `LedgerError`.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised while parsing primitive values from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Input was not valid hexadecimal.
    #[error("invalid hex in {field}: {message}")]
    InvalidHex {
        /// Name of the value being parsed.
        field: &'static str,
        /// Decoder message.
        message: String,
    },

    /// Decoded value had the wrong byte length.
    #[error("invalid {field} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Name of the value being parsed.
        field: &'static str,
        /// Required byte length.
        expected: usize,
        /// Observed byte length.
        actual: usize,
    },

    /// Input did not describe a calendar date.
    #[error("invalid date: {0}")]
    InvalidDate(String),
}

impl CoreError {
    /// Creates an invalid-hex error from a decoder failure.
    pub fn invalid_hex(field: &'static str, err: hex::FromHexError) -> Self {
        Self::InvalidHex { field, message: err.to_string() }
    }
}

/// Reason the ledger state machine refused a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Caller is not the registered publisher for the fingerprint.
    #[error("caller is not the registered publisher")]
    Unauthorized,

    /// A record already exists for the key.
    #[error("record already attested for this key")]
    AlreadyAttested,

    /// Administrative call from an identity other than the owner.
    #[error("caller is not the ledger owner")]
    NotOwner,

    /// Attestation carried an all-zero root.
    #[error("root must not be zero")]
    ZeroRoot,

    /// Attestation carried an empty batch identifier.
    #[error("batch identifier must not be empty")]
    EmptyBatchId,

    /// Signature did not verify or the sender does not match the key.
    #[error("transaction signature is invalid")]
    BadSignature,

    /// Transaction sequence number was not the next expected one.
    #[error("unexpected sequence number")]
    SequenceMismatch,
}

/// Failures observed while reading from or writing to the ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Network failure, timeout, or rate limiting. Safe to retry.
    #[error("transient ledger RPC failure: {message}")]
    RpcTransient {
        /// Description of the failure.
        message: String,
    },

    /// Insufficient funds, malformed transaction, or exhausted retries.
    #[error("fatal ledger RPC failure: {message}")]
    RpcFatal {
        /// Description of the failure.
        message: String,
    },

    /// Ledger refused the write because the caller is not the publisher.
    #[error("{} is not the registered publisher for {}", or_unknown(caller), or_unknown(fingerprint))]
    Unauthorized {
        /// Fingerprint the write targeted, when known.
        fingerprint: Option<FingerprintKey>,
        /// Identity that attempted the write, when known.
        caller: Option<Address>,
    },

    /// Ledger refused the transaction for another reason.
    #[error("ledger rejected transaction: {reason}")]
    Rejected {
        /// Refusal reported by the ledger.
        reason: RejectReason,
    },

    /// Transaction did not reach the required depth in time.
    #[error("transaction {tx_hash} reached {confirmations}/{required} confirmations before timeout")]
    ConfirmationTimeout {
        /// Hash of the pending transaction.
        tx_hash: TxHash,
        /// Confirmations observed when the wait ended.
        confirmations: u64,
        /// Confirmations required.
        required: u64,
    },

    /// Caller abandoned the operation locally.
    #[error("operation cancelled while waiting for {}", or_unknown(tx_hash))]
    Cancelled {
        /// Transaction that may still land, if one was submitted.
        tx_hash: Option<TxHash>,
    },
}

fn or_unknown<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "unknown".to_string(), ToString::to_string)
}

impl LedgerError {
    /// Creates a transient RPC error.
    pub fn rpc_transient(message: impl Into<String>) -> Self {
        Self::RpcTransient { message: message.into() }
    }

    /// Creates a fatal RPC error.
    pub fn rpc_fatal(message: impl Into<String>) -> Self {
        Self::RpcFatal { message: message.into() }
    }

    /// Maps a ledger refusal to the matching error variant.
    ///
    /// `Unauthorized` refusals become `LedgerError::Unauthorized` so callers
    /// can match publisher misconfiguration directly.
    pub fn rejected(reason: RejectReason) -> Self {
        match reason {
            RejectReason::Unauthorized => Self::Unauthorized { fingerprint: None, caller: None },
            reason => Self::Rejected { reason },
        }
    }

    /// Escalates the last error after the retry budget is spent.
    pub fn retries_exhausted(attempts: u32, last: &Self) -> Self {
        Self::RpcFatal { message: format!("retries exhausted after {attempts} attempts: {last}") }
    }

    /// Returns the ledger refusal carried by this error, if any.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected { reason } => Some(*reason),
            Self::Unauthorized { .. } => Some(RejectReason::Unauthorized),
            _ => None,
        }
    }

    /// Returns true if the operation should be retried.
    ///
    /// A sequence mismatch is retryable because the submitter resyncs its
    /// counter before the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RpcTransient { .. } | Self::Rejected { reason: RejectReason::SequenceMismatch }
        )
    }

    /// Returns the error category for logging and exit-code mapping.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RpcTransient { .. } => ErrorCategory::Transient,
            Self::RpcFatal { .. } => ErrorCategory::Fatal,
            Self::Unauthorized { .. } => ErrorCategory::Authorization,
            Self::Rejected { .. } => ErrorCategory::Rejected,
            Self::ConfirmationTimeout { .. } | Self::Cancelled { .. } => ErrorCategory::Pending,
        }
    }
}

/// Error categories for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-level failure that may clear on retry.
    Transient,
    /// Failure that will not clear without operator action.
    Fatal,
    /// Publisher registration problem.
    Authorization,
    /// Ledger refused the transaction.
    Rejected,
    /// Outcome unknown; the write may still land.
    Pending,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
            Self::Authorization => write!(f, "authorization"),
            Self::Rejected => write!(f, "rejected"),
            Self::Pending => write!(f, "pending"),
        }
    }
}
