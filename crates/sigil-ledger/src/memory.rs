//! In-memory ledger implementing `LedgerGateway`.
//!
//! Models the parts of a public ledger the attestation pipeline depends on:
//! signature checks, per-sender sequence numbers, transaction dedup by hash,
//! block inclusion with receipts, and confirmation depth. Used by tests and
//! local dry runs; fault injection lets tests exercise retry and
//! reconciliation paths deterministically.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use sigil_core::{
    Address, AttestationRecord, Clock, EventHandler, FingerprintKey, LedgerError, LedgerGateway,
    ReceiptStatus, RecordKey, RejectReason, SignedTransaction, TxHash, TxReceipt,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::state::{AttestationLedgerState, ExecutionContext, KeyState};

#[derive(Debug, Default)]
struct Chain {
    height: u64,
    sequences: HashMap<Address, u64>,
    known: HashMap<TxHash, SignedTransaction>,
    receipts: HashMap<TxHash, TxReceipt>,
    pending: VecDeque<SignedTransaction>,
    submissions: Vec<SignedTransaction>,
    faults: VecDeque<LedgerError>,
    auto_mine: bool,
    hide_receipts: bool,
    block_time: Option<Duration>,
    last_block_at: Option<Instant>,
}

/// Single-process ledger with blocks, receipts and fault injection.
#[derive(Debug)]
pub struct InMemoryLedger {
    state: AttestationLedgerState,
    clock: Arc<dyn Clock>,
    chain: Mutex<Chain>,
}

impl InMemoryLedger {
    /// Creates a ledger administered by `owner`, mining each accepted
    /// submission into its own block.
    pub fn new(owner: Address, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AttestationLedgerState::in_memory(owner),
            clock,
            chain: Mutex::new(Chain { auto_mine: true, ..Chain::default() }),
        }
    }

    /// Publishes ledger events to `handler`.
    #[must_use]
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.state = self.state.with_event_handler(handler);
        self
    }

    /// Underlying state machine.
    pub fn state(&self) -> &AttestationLedgerState {
        &self.state
    }

    /// State of one record key.
    pub fn key_state(&self, key: &RecordKey) -> KeyState {
        self.state.key_state(key)
    }

    /// Number of attested records.
    pub fn record_count(&self) -> usize {
        self.state.record_count()
    }

    /// Enables or disables mining on submit. When disabled, submissions
    /// stay pending until `mine_blocks`.
    pub async fn set_auto_mine(&self, enabled: bool) {
        self.chain.lock().await.auto_mine = enabled;
    }

    /// Mines `count` blocks; the first includes every pending transaction.
    pub async fn mine_blocks(&self, count: u64) {
        let mut chain = self.chain.lock().await;
        self.mine(&mut chain, count).await;
    }

    /// Produces one block every `interval` of clock time, observed whenever
    /// the height or a receipt is read. `None` stops time-based blocks.
    pub async fn set_block_time(&self, interval: Option<Duration>) {
        let mut chain = self.chain.lock().await;
        chain.block_time = interval;
        chain.last_block_at = Some(self.clock.now());
    }

    /// Makes the next `count` gateway calls fail with `error`.
    pub async fn fail_next(&self, count: usize, error: LedgerError) {
        let mut chain = self.chain.lock().await;
        chain.faults.extend(std::iter::repeat(error).take(count));
    }

    /// While enabled, `receipt` reports every transaction as pending, as if
    /// the node lost track of it.
    pub async fn drop_receipts(&self, enabled: bool) {
        self.chain.lock().await.hide_receipts = enabled;
    }

    /// Every distinct transaction accepted for inclusion, in order.
    pub async fn submissions(&self) -> Vec<SignedTransaction> {
        self.chain.lock().await.submissions.clone()
    }

    async fn take_fault(&self) -> Result<(), LedgerError> {
        match self.chain.lock().await.faults.pop_front() {
            Some(error) => {
                debug!(error = %error, "injected ledger fault");
                Err(error)
            },
            None => Ok(()),
        }
    }

    async fn mine(&self, chain: &mut Chain, count: u64) {
        for block in 0..count {
            chain.height += 1;
            if block == 0 {
                let height = chain.height;
                while let Some(tx) = chain.pending.pop_front() {
                    self.include(chain, &tx, height).await;
                }
            }
        }
    }

    async fn catch_up(&self, chain: &mut Chain) {
        let (Some(interval), Some(last)) = (chain.block_time, chain.last_block_at) else {
            return;
        };
        if interval.is_zero() {
            return;
        }
        let now = self.clock.now();
        let blocks = elapsed_blocks(now.saturating_duration_since(last), interval);
        if blocks > 0 {
            self.mine(chain, u64::from(blocks)).await;
            let mined = interval.saturating_mul(blocks);
            chain.last_block_at = Some(last.checked_add(mined).unwrap_or(now));
        }
    }

    async fn include(&self, chain: &mut Chain, tx: &SignedTransaction, height: u64) {
        let tx_hash = tx.hash();
        let ctx = ExecutionContext {
            caller: tx.transaction.sender,
            timestamp: self.clock.now_utc(),
            tx_hash: Some(tx_hash),
            height: Some(height),
        };

        let status = match self.state.execute(ctx, &tx.transaction.call).await {
            Ok(()) => ReceiptStatus::Accepted,
            Err(reason) => {
                warn!(tx_hash = %tx_hash, reason = %reason, "included transaction rejected");
                ReceiptStatus::Rejected(reason)
            },
        };
        chain.receipts.insert(tx_hash, TxReceipt { tx_hash, height, status });
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<AttestationRecord>, LedgerError> {
        self.take_fault().await?;
        Ok(self.state.get_record(key))
    }

    async fn publisher_of(&self, fingerprint: &FingerprintKey) -> Result<Option<Address>, LedgerError> {
        self.take_fault().await?;
        Ok(self.state.publisher_of(fingerprint))
    }

    async fn next_sequence(&self, address: &Address) -> Result<u64, LedgerError> {
        self.take_fault().await?;
        Ok(self.chain.lock().await.sequences.get(address).copied().unwrap_or(0))
    }

    async fn submit(&self, transaction: &SignedTransaction) -> Result<TxHash, LedgerError> {
        self.take_fault().await?;
        let tx_hash = transaction.hash();
        let mut chain = self.chain.lock().await;

        if chain.known.contains_key(&tx_hash) {
            debug!(tx_hash = %tx_hash, "duplicate submission");
            return Ok(tx_hash);
        }
        if !transaction.verify() {
            return Err(LedgerError::rejected(RejectReason::BadSignature));
        }

        let sender = transaction.transaction.sender;
        let expected = chain.sequences.get(&sender).copied().unwrap_or(0);
        if transaction.transaction.sequence != expected {
            debug!(
                sender = %sender,
                expected,
                got = transaction.transaction.sequence,
                "sequence mismatch"
            );
            return Err(LedgerError::rejected(RejectReason::SequenceMismatch));
        }

        chain.sequences.insert(sender, expected + 1);
        chain.known.insert(tx_hash, transaction.clone());
        chain.submissions.push(transaction.clone());

        if chain.auto_mine {
            chain.height += 1;
            let height = chain.height;
            self.include(&mut chain, transaction, height).await;
        } else {
            chain.pending.push_back(transaction.clone());
        }

        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, LedgerError> {
        self.take_fault().await?;
        let mut chain = self.chain.lock().await;
        self.catch_up(&mut chain).await;
        if chain.hide_receipts {
            return Ok(None);
        }
        Ok(chain.receipts.get(tx_hash).copied())
    }

    async fn height(&self) -> Result<u64, LedgerError> {
        self.take_fault().await?;
        let mut chain = self.chain.lock().await;
        self.catch_up(&mut chain).await;
        Ok(chain.height)
    }
}

/// Whole block intervals in `elapsed`, saturating at `u32::MAX`.
fn elapsed_blocks(elapsed: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 0;
    }
    u32::try_from(elapsed.as_nanos() / interval.as_nanos()).unwrap_or(u32::MAX)
}
