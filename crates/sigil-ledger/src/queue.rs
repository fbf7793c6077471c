//! Per-identity submission queue.
//!
//! One task owns the signer and its sequence counter. Requests arrive over
//! an mpsc channel and are processed strictly one at a time: sign with the
//! next sequence number, submit (retrying transient failures with the same
//! signed bytes), reply with the transaction hash, then wait until the
//! transaction is included before taking the next request. No two writes
//! from one identity are ever in flight together.
//!
//! A request cancelled before it is signed is answered with
//! `Cancelled { tx_hash: None }` and never reaches the ledger. Once a
//! transaction has been sent, cancellation reports its hash instead.

use std::{fmt, sync::Arc, time::Duration};

use sigil_core::{
    Address, Clock, LedgerCall, LedgerError, LedgerGateway, RejectReason, SignedTransaction,
    Transaction, TransactionSigner, TxHash,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::retry::{RetryDecision, RetryPolicy};

const QUEUE_CAPACITY: usize = 64;

/// Timing for the queue's submit and inclusion loops.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retry policy for submission and reads.
    pub retry_policy: RetryPolicy,
    /// Delay between inclusion checks.
    pub poll_interval: Duration,
    /// How long to wait for inclusion before moving on.
    pub inclusion_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            poll_interval: Duration::from_secs(2),
            inclusion_timeout: Duration::from_secs(120),
        }
    }
}

/// Transaction accepted by the ledger for inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedTx {
    /// Hash of the submitted transaction.
    pub tx_hash: TxHash,
    /// Sequence number it was signed with.
    pub sequence: u64,
}

struct SubmitRequest {
    call: LedgerCall,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<SubmittedTx, LedgerError>>,
}

/// Handle to a per-identity submission task.
///
/// Clones share the same task, so every clone observes the same ordering.
/// The task stops once every handle is dropped.
#[derive(Clone)]
pub struct SubmissionQueue {
    address: Address,
    sender: mpsc::Sender<SubmitRequest>,
}

impl fmt::Debug for SubmissionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionQueue").field("address", &self.address).finish_non_exhaustive()
    }
}

impl SubmissionQueue {
    /// Spawns the submission task for `signer`.
    pub fn spawn(
        gateway: Arc<dyn LedgerGateway>,
        signer: Arc<dyn TransactionSigner>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        let address = signer.address();
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);

        let worker = QueueWorker { gateway, signer, clock, config, next_sequence: None };
        let span = info_span!("submission_queue", address = %address);
        tokio::spawn(worker.run(receiver).instrument(span));

        Self { address, sender }
    }

    /// Address of the identity this queue signs for.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs and submits `call`, returning once the ledger accepted the
    /// transaction for inclusion.
    ///
    /// # Errors
    ///
    /// Returns the submission error, or `RpcFatal` if the queue task is gone.
    pub async fn submit(&self, call: LedgerCall) -> Result<SubmittedTx, LedgerError> {
        self.submit_with_cancel(call, &CancellationToken::new()).await
    }

    /// Like [`SubmissionQueue::submit`], but gives up when `cancel` fires.
    ///
    /// Always waits for the queue's answer, so the caller learns whether a
    /// transaction went out.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled { tx_hash: None }` if cancelled before signing,
    /// `Cancelled { tx_hash: Some(..) }` if cancelled between retries of a
    /// sent transaction, otherwise as [`SubmissionQueue::submit`].
    pub async fn submit_with_cancel(
        &self,
        call: LedgerCall,
        cancel: &CancellationToken,
    ) -> Result<SubmittedTx, LedgerError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(SubmitRequest { call, cancel: cancel.clone(), reply })
            .await
            .map_err(|_| LedgerError::rpc_fatal("submission queue stopped"))?;
        response.await.map_err(|_| LedgerError::rpc_fatal("submission queue dropped request"))?
    }
}

struct QueueWorker {
    gateway: Arc<dyn LedgerGateway>,
    signer: Arc<dyn TransactionSigner>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    next_sequence: Option<u64>,
}

impl QueueWorker {
    async fn run(mut self, mut receiver: mpsc::Receiver<SubmitRequest>) {
        while let Some(request) = receiver.recv().await {
            if request.cancel.is_cancelled() || request.reply.is_closed() {
                debug!(call = request.call.name(), "request cancelled before signing, skipping");
                let _ = request.reply.send(Err(LedgerError::Cancelled { tx_hash: None }));
                continue;
            }

            let result = self.submit(request.call, &request.cancel).await;
            let submitted = result.as_ref().ok().copied();

            if request.reply.send(result).is_err() {
                debug!("submitter went away before reply");
            }
            if let Some(submitted) = submitted {
                self.await_inclusion(submitted.tx_hash).await;
            }
        }
        debug!("submission queue closed");
    }

    async fn sequence(&mut self) -> Result<u64, LedgerError> {
        if let Some(sequence) = self.next_sequence {
            return Ok(sequence);
        }
        let address = self.signer.address();
        let sequence = self.gateway.next_sequence(&address).await?;
        debug!(sequence, "synchronised sequence counter");
        self.next_sequence = Some(sequence);
        Ok(sequence)
    }

    fn sign(&self, sequence: u64, call: &LedgerCall) -> SignedTransaction {
        self.signer.sign(Transaction::new(self.signer.address(), sequence, call.clone()))
    }

    async fn submit(
        &mut self,
        call: LedgerCall,
        cancel: &CancellationToken,
    ) -> Result<SubmittedTx, LedgerError> {
        let mut attempt = 1;
        let mut signed: Option<SignedTransaction> = None;

        loop {
            let outcome = match self.sequence().await {
                Ok(sequence) => {
                    let tx = match signed.take() {
                        Some(tx) if tx.transaction.sequence == sequence => tx,
                        _ => self.sign(sequence, &call),
                    };
                    let result = self.gateway.submit(&tx).await;
                    signed = Some(tx);
                    result.map(|tx_hash| SubmittedTx { tx_hash, sequence })
                },
                Err(error) => Err(error),
            };

            let error = match outcome {
                Ok(submitted) => {
                    self.next_sequence = Some(submitted.sequence + 1);
                    info!(
                        call = call.name(),
                        tx_hash = %submitted.tx_hash,
                        sequence = submitted.sequence,
                        attempt,
                        "transaction submitted"
                    );
                    return Ok(submitted);
                },
                Err(error) => error,
            };

            if error.reject_reason() == Some(RejectReason::SequenceMismatch) {
                self.next_sequence = None;
            }

            match self.config.retry_policy.decide(attempt, &error) {
                RetryDecision::Retry { delay } => {
                    warn!(call = call.name(), attempt, error = %error, "submission failed, retrying");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            // A sent attempt may still land; the counter must be re-read.
                            let tx_hash = signed.as_ref().map(SignedTransaction::hash);
                            warn!(call = call.name(), attempt, "cancelled between submission attempts");
                            self.next_sequence = None;
                            return Err(LedgerError::Cancelled { tx_hash });
                        },
                        () = self.clock.sleep(delay) => {},
                    }
                    attempt += 1;
                },
                RetryDecision::GiveUp { reason } => {
                    warn!(call = call.name(), attempt, error = %error, %reason, "submission failed");
                    self.next_sequence = None;
                    return Err(if error.is_retryable() {
                        LedgerError::retries_exhausted(attempt, &error)
                    } else {
                        error
                    });
                },
            }
        }
    }

    async fn await_inclusion(&self, tx_hash: TxHash) {
        let started = self.clock.now();
        loop {
            match self.gateway.receipt(&tx_hash).await {
                Ok(Some(receipt)) => {
                    debug!(tx_hash = %tx_hash, height = receipt.height, "transaction included");
                    return;
                },
                Ok(None) => {},
                Err(error) => debug!(tx_hash = %tx_hash, error = %error, "receipt poll failed"),
            }

            if self.clock.now().duration_since(started) >= self.config.inclusion_timeout {
                warn!(tx_hash = %tx_hash, "transaction not included before timeout, releasing queue");
                return;
            }
            self.clock.sleep(self.config.poll_interval).await;
        }
    }
}
