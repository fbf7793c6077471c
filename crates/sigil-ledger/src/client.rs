//! Idempotent anchoring of batch roots.
//!
//! `AttestationClient::submit` checks the ledger before writing, so pipeline
//! re-runs never pay for a duplicate write, then submits through the
//! identity's `SubmissionQueue` and polls until the configured confirmation
//! depth is reached. If the wait is cancelled or times out, a reconciliation
//! read decides whether the write landed anyway; cancellation never assumes
//! the ledger rolled anything back.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use sigil_core::{
    Address, AttestationDate, AttestationRecord, Clock, FingerprintKey, LedgerCall, LedgerError,
    LedgerGateway, MerkleRoot, ReceiptStatus, RecordKey, RejectReason, TransactionSigner, TxHash,
    TxReceipt,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    queue::{QueueConfig, SubmissionQueue},
    retry::{with_retry, RetryPolicy},
};

/// Attestation client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Confirmations required before a write counts as attested.
    pub confirmations: u64,
    /// Delay between confirmation polls.
    pub poll_interval: Duration,
    /// Maximum time to wait for the required confirmations.
    pub confirmation_timeout: Duration,
    /// Retry policy for ledger calls.
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            confirmations: 2,
            poll_interval: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(300),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Queue settings matching this client configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            retry_policy: self.retry_policy.clone(),
            poll_interval: self.poll_interval,
            inclusion_timeout: self.confirmation_timeout,
        }
    }
}

/// Successful result of `AttestationClient::submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestOutcome {
    /// This call wrote the record and it reached the required depth.
    Attested {
        /// Stored record.
        record: AttestationRecord,
        /// Transaction that wrote it.
        tx_hash: TxHash,
        /// Confirmations observed.
        confirmations: u64,
    },
    /// A record already existed for the key; nothing was written.
    AlreadyAttested {
        /// Existing record.
        record: AttestationRecord,
    },
    /// The confirmation wait ended early, but a reconciliation read shows
    /// the record is on the ledger.
    Landed {
        /// Stored record.
        record: AttestationRecord,
        /// Transaction that carried the write.
        tx_hash: TxHash,
    },
}

impl AttestOutcome {
    /// Record now stored on the ledger.
    pub fn record(&self) -> &AttestationRecord {
        match self {
            Self::Attested { record, .. }
            | Self::AlreadyAttested { record }
            | Self::Landed { record, .. } => record,
        }
    }

    /// Returns true if the stored record carries `root`.
    ///
    /// An `AlreadyAttested` outcome may hold a different root from an
    /// earlier batch filed under the same key.
    pub fn root_matches(&self, root: &MerkleRoot) -> bool {
        self.record().root == *root
    }

    /// Transaction written by this call, if any.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            Self::Attested { tx_hash, .. } | Self::Landed { tx_hash, .. } => Some(*tx_hash),
            Self::AlreadyAttested { .. } => None,
        }
    }

    /// Short outcome name for logs and audit rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Attested { .. } => "attested",
            Self::AlreadyAttested { .. } => "already_attested",
            Self::Landed { .. } => "landed",
        }
    }
}

enum Wait {
    Confirmed(TxReceipt, u64),
    Rejected(RejectReason),
    Cancelled,
    TimedOut(u64),
}

/// Anchors batch roots on the ledger for one signing identity.
#[derive(Clone)]
pub struct AttestationClient {
    gateway: Arc<dyn LedgerGateway>,
    queue: SubmissionQueue,
    clock: Arc<dyn Clock>,
    config: ClientConfig,
}

impl fmt::Debug for AttestationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationClient")
            .field("address", &self.queue.address())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AttestationClient {
    /// Creates a client with its own submission queue for `signer`.
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        signer: Arc<dyn TransactionSigner>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
    ) -> Self {
        let queue =
            SubmissionQueue::spawn(Arc::clone(&gateway), signer, Arc::clone(&clock), config.queue_config());
        Self::with_queue(gateway, queue, clock, config)
    }

    /// Creates a client that shares an existing submission queue.
    pub fn with_queue(
        gateway: Arc<dyn LedgerGateway>,
        queue: SubmissionQueue,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
    ) -> Self {
        Self { gateway, queue, clock, config }
    }

    /// Address this client writes as.
    pub fn address(&self) -> Address {
        self.queue.address()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Reads the record at `key`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the read error once retries are exhausted.
    pub async fn record(&self, key: &RecordKey) -> Result<Option<AttestationRecord>, LedgerError> {
        with_retry(&self.config.retry_policy, self.clock.as_ref(), "get_record", || {
            self.gateway.get_record(key)
        })
        .await
    }

    /// Anchors `root` under `(fingerprint, date)`.
    ///
    /// # Errors
    ///
    /// See [`AttestationClient::submit_with_cancel`].
    pub async fn submit(
        &self,
        fingerprint: FingerprintKey,
        date: AttestationDate,
        root: MerkleRoot,
        batch_id: &str,
    ) -> Result<AttestOutcome, LedgerError> {
        self.submit_with_cancel(fingerprint, date, root, batch_id, &CancellationToken::new()).await
    }

    /// Anchors `root` under `(fingerprint, date)`, abandoning the wait when
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if this identity is not the fingerprint's publisher
    /// - `RpcFatal` for non-retryable failures or exhausted retries
    /// - `Rejected` for other ledger refusals
    /// - `Cancelled` / `ConfirmationTimeout` if the wait ended and the
    ///   reconciliation read does not find the record
    pub async fn submit_with_cancel(
        &self,
        fingerprint: FingerprintKey,
        date: AttestationDate,
        root: MerkleRoot,
        batch_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AttestOutcome, LedgerError> {
        let key = RecordKey::new(fingerprint, date);
        let span = info_span!("attest", key = %key, root = %root, batch_id = %batch_id);

        async move {
            if let Some(record) = self.record(&key).await? {
                info!(existing_root = %record.root, "record already attested, skipping write");
                return Ok(AttestOutcome::AlreadyAttested { record });
            }

            let call = LedgerCall::Attest { fingerprint, date, root, batch_id: batch_id.to_string() };
            let submitted = match self.queue.submit_with_cancel(call, cancel).await {
                Ok(submitted) => submitted,
                Err(LedgerError::Cancelled { tx_hash }) => {
                    warn!(sent = tx_hash.is_some(), "cancelled before submission completed");
                    return self.reconcile(&key, tx_hash, LedgerError::Cancelled { tx_hash }).await;
                },
                Err(error) => return self.handle_refusal(&key, error).await,
            };
            let tx_hash = submitted.tx_hash;

            match self.wait_for_confirmations(tx_hash, cancel).await? {
                Wait::Confirmed(receipt, confirmations) => {
                    let record = self.record(&key).await?.ok_or_else(|| {
                        LedgerError::rpc_fatal(format!("accepted transaction {tx_hash} left no record"))
                    })?;
                    info!(tx_hash = %tx_hash, height = receipt.height, confirmations, "root anchored");
                    Ok(AttestOutcome::Attested { record, tx_hash, confirmations })
                },
                Wait::Rejected(reason) => {
                    self.handle_refusal(&key, LedgerError::rejected(reason)).await
                },
                Wait::Cancelled => {
                    self.reconcile(&key, Some(tx_hash), LedgerError::Cancelled { tx_hash: Some(tx_hash) })
                        .await
                },
                Wait::TimedOut(confirmations) => {
                    let timeout = LedgerError::ConfirmationTimeout {
                        tx_hash,
                        confirmations,
                        required: self.config.confirmations,
                    };
                    self.reconcile(&key, Some(tx_hash), timeout).await
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Registers `publisher` for `fingerprint`. Only the ledger owner may
    /// do this.
    ///
    /// # Errors
    ///
    /// Returns `Rejected { NotOwner }` if this identity is not the owner, or
    /// the usual submission and confirmation errors.
    pub async fn set_publisher(
        &self,
        fingerprint: FingerprintKey,
        publisher: Address,
    ) -> Result<TxReceipt, LedgerError> {
        let span = info_span!("set_publisher", fingerprint = %fingerprint, publisher = %publisher);
        async move {
            let submitted = self.queue.submit(LedgerCall::SetPublisher { fingerprint, publisher }).await?;
            let tx_hash = submitted.tx_hash;

            match self.wait_for_confirmations(tx_hash, &CancellationToken::new()).await? {
                Wait::Confirmed(receipt, _) => {
                    info!(tx_hash = %tx_hash, "publisher registered");
                    Ok(receipt)
                },
                Wait::Rejected(reason) => Err(LedgerError::rejected(reason)),
                Wait::Cancelled => Err(LedgerError::Cancelled { tx_hash: Some(tx_hash) }),
                Wait::TimedOut(confirmations) => Err(LedgerError::ConfirmationTimeout {
                    tx_hash,
                    confirmations,
                    required: self.config.confirmations,
                }),
            }
        }
        .instrument(span)
        .await
    }

    async fn wait_for_confirmations(
        &self,
        tx_hash: TxHash,
        cancel: &CancellationToken,
    ) -> Result<Wait, LedgerError> {
        let policy = &self.config.retry_policy;
        let started = self.clock.now();
        let mut confirmations = 0;

        loop {
            let receipt =
                with_retry(policy, self.clock.as_ref(), "receipt", || self.gateway.receipt(&tx_hash)).await?;

            if let Some(receipt) = receipt {
                if let ReceiptStatus::Rejected(reason) = receipt.status {
                    return Ok(Wait::Rejected(reason));
                }
                let height = with_retry(policy, self.clock.as_ref(), "height", || self.gateway.height()).await?;
                confirmations = receipt.confirmations(height);
                debug!(tx_hash = %tx_hash, confirmations, required = self.config.confirmations, "polled confirmations");
                if confirmations >= self.config.confirmations {
                    return Ok(Wait::Confirmed(receipt, confirmations));
                }
            }

            if self.clock.now().duration_since(started) >= self.config.confirmation_timeout {
                return Ok(Wait::TimedOut(confirmations));
            }

            tokio::select! {
                () = self.clock.sleep(self.config.poll_interval) => {},
                () = cancel.cancelled() => return Ok(Wait::Cancelled),
            }
        }
    }

    async fn handle_refusal(&self, key: &RecordKey, error: LedgerError) -> Result<AttestOutcome, LedgerError> {
        match error.reject_reason() {
            Some(RejectReason::AlreadyAttested) => {
                match self.record(key).await? {
                    Some(record) => {
                        info!(existing_root = %record.root, "ledger reports key already attested");
                        Ok(AttestOutcome::AlreadyAttested { record })
                    },
                    None => Err(error),
                }
            },
            Some(RejectReason::Unauthorized) => Err(LedgerError::Unauthorized {
                fingerprint: Some(key.fingerprint),
                caller: Some(self.address()),
            }),
            _ => Err(error),
        }
    }

    async fn reconcile(
        &self,
        key: &RecordKey,
        tx_hash: Option<TxHash>,
        otherwise: LedgerError,
    ) -> Result<AttestOutcome, LedgerError> {
        match self.record(key).await? {
            Some(record) => match tx_hash {
                Some(tx_hash) => {
                    info!(tx_hash = %tx_hash, "reconciliation read found the record");
                    Ok(AttestOutcome::Landed { record, tx_hash })
                },
                None => Ok(AttestOutcome::AlreadyAttested { record }),
            },
            None => {
                warn!(error = %otherwise, "reconciliation read found no record");
                Err(otherwise)
            },
        }
    }
}
