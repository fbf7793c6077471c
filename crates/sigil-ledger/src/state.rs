//! Attestation ledger state machine.
//!
//! Each `(fingerprint, date)` key moves `Unset -> Attested` at most once.
//! A write is accepted only from the publisher registered for the
//! fingerprint, and the owner identity is the only caller allowed to change
//! that registration. Record storage sits behind `RecordStore` so the same
//! rules run over any put-if-absent backend.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use sigil_core::{
    Address, AttestationDate, AttestationRecord, AttestedEvent, EventHandler, FingerprintKey,
    LedgerCall, LedgerEvent, MerkleRoot, NoOpEventHandler, PublisherChangedEvent, RecordKey,
    RejectReason, TxHash,
};
use tracing::{debug, info};

/// Write-once record storage.
pub trait RecordStore: Send + Sync + fmt::Debug {
    /// Reads the record at `key`.
    fn get(&self, key: &RecordKey) -> Option<AttestationRecord>;

    /// Stores `record` at `key` unless one exists, in which case the
    /// existing record is returned and nothing changes.
    ///
    /// # Errors
    ///
    /// Returns the existing record if the key is already set.
    fn put_if_absent(
        &self,
        key: RecordKey,
        record: AttestationRecord,
    ) -> Result<(), AttestationRecord>;

    /// Number of stored records.
    fn len(&self) -> usize;

    /// Returns true if no records are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory `RecordStore`.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordKey, AttestationRecord>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &RecordKey) -> Option<AttestationRecord> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn put_if_absent(
        &self,
        key: RecordKey,
        record: AttestationRecord,
    ) -> Result<(), AttestationRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.get(&key) {
            Some(existing) => Err(existing.clone()),
            None => {
                records.insert(key, record);
                Ok(())
            },
        }
    }

    fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Observable state of one record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState {
    /// No record yet.
    Unset,
    /// Terminal: the record is immutable.
    Attested(AttestationRecord),
}

/// Who is executing a call, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Identity that signed the call.
    pub caller: Address,
    /// Ledger time of execution.
    pub timestamp: DateTime<Utc>,
    /// Carrying transaction, when executed from a block.
    pub tx_hash: Option<TxHash>,
    /// Block height, when executed from a block.
    pub height: Option<u64>,
}

impl ExecutionContext {
    /// Context for a direct call outside any block.
    pub fn direct(caller: Address, timestamp: DateTime<Utc>) -> Self {
        Self { caller, timestamp, tx_hash: None, height: None }
    }
}

/// The attestation ledger's state machine.
pub struct AttestationLedgerState<S = MemoryRecordStore> {
    owner: Address,
    store: S,
    publishers: RwLock<HashMap<FingerprintKey, Address>>,
    events: Arc<dyn EventHandler>,
}

impl<S: RecordStore> fmt::Debug for AttestationLedgerState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationLedgerState")
            .field("owner", &self.owner)
            .field("records", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl AttestationLedgerState<MemoryRecordStore> {
    /// Creates an in-memory ledger state administered by `owner`.
    pub fn in_memory(owner: Address) -> Self {
        Self::new(owner, MemoryRecordStore::new())
    }
}

impl<S: RecordStore> AttestationLedgerState<S> {
    /// Creates a state machine over `store`, administered by `owner`.
    pub fn new(owner: Address, store: S) -> Self {
        Self {
            owner,
            store,
            publishers: RwLock::new(HashMap::new()),
            events: Arc::new(NoOpEventHandler),
        }
    }

    /// Publishes transitions to `handler`.
    #[must_use]
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = handler;
        self
    }

    /// Administrative owner identity.
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Publisher registered for `fingerprint`.
    pub fn publisher_of(&self, fingerprint: &FingerprintKey) -> Option<Address> {
        self.publishers.read().unwrap_or_else(PoisonError::into_inner).get(fingerprint).copied()
    }

    /// Record at `key`, if attested.
    pub fn get_record(&self, key: &RecordKey) -> Option<AttestationRecord> {
        self.store.get(key)
    }

    /// Current state of `key`.
    pub fn key_state(&self, key: &RecordKey) -> KeyState {
        self.store.get(key).map_or(KeyState::Unset, KeyState::Attested)
    }

    /// Number of attested records.
    pub fn record_count(&self) -> usize {
        self.store.len()
    }

    /// Executes one ledger call on behalf of `ctx.caller`.
    ///
    /// # Errors
    ///
    /// Returns the `RejectReason` if the call is refused; state is unchanged.
    pub async fn execute(&self, ctx: ExecutionContext, call: &LedgerCall) -> Result<(), RejectReason> {
        match call {
            LedgerCall::Attest { fingerprint, date, root, batch_id } => {
                self.attest(ctx, *fingerprint, *date, *root, batch_id).await.map(|_| ())
            },
            LedgerCall::SetPublisher { fingerprint, publisher } => {
                self.set_publisher(ctx, *fingerprint, *publisher).await.map(|_| ())
            },
        }
    }

    /// Writes the record for `(fingerprint, date)`.
    ///
    /// # Errors
    ///
    /// - `ZeroRoot` / `EmptyBatchId` for malformed input
    /// - `Unauthorized` if the caller is not the registered publisher
    /// - `AlreadyAttested` if the key is already set
    pub async fn attest(
        &self,
        ctx: ExecutionContext,
        fingerprint: FingerprintKey,
        date: AttestationDate,
        root: MerkleRoot,
        batch_id: &str,
    ) -> Result<AttestationRecord, RejectReason> {
        if root.is_zero() {
            return Err(RejectReason::ZeroRoot);
        }
        if batch_id.is_empty() {
            return Err(RejectReason::EmptyBatchId);
        }
        if self.publisher_of(&fingerprint) != Some(ctx.caller) {
            debug!(fingerprint = %fingerprint, caller = %ctx.caller, "refusing attest from unregistered caller");
            return Err(RejectReason::Unauthorized);
        }

        let key = RecordKey::new(fingerprint, date);
        let record = AttestationRecord {
            root,
            batch_id: batch_id.to_string(),
            timestamp: ctx.timestamp,
            publisher: ctx.caller,
        };
        if self.store.put_if_absent(key, record.clone()).is_err() {
            debug!(key = %key, "refusing attest for already attested key");
            return Err(RejectReason::AlreadyAttested);
        }

        info!(key = %key, root = %root, batch_id = %batch_id, publisher = %ctx.caller, "record attested");
        self.events
            .handle_event(LedgerEvent::Attested(AttestedEvent {
                fingerprint,
                date,
                root,
                batch_id: record.batch_id.clone(),
                timestamp: record.timestamp,
                publisher: record.publisher,
                tx_hash: ctx.tx_hash,
                height: ctx.height,
            }))
            .await;

        Ok(record)
    }

    /// Sets or replaces the publisher for `fingerprint`, returning the
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns `NotOwner` if the caller is not the owner.
    pub async fn set_publisher(
        &self,
        ctx: ExecutionContext,
        fingerprint: FingerprintKey,
        publisher: Address,
    ) -> Result<Option<Address>, RejectReason> {
        if ctx.caller != self.owner {
            return Err(RejectReason::NotOwner);
        }

        let previous = self
            .publishers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fingerprint, publisher);

        info!(fingerprint = %fingerprint, publisher = %publisher, "publisher registered");
        self.events
            .handle_event(LedgerEvent::PublisherChanged(PublisherChangedEvent {
                fingerprint,
                previous,
                publisher,
                timestamp: ctx.timestamp,
            }))
            .await;

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sigil_core::Digest;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<LedgerEvent>>);

    #[async_trait::async_trait]
    impl EventHandler for Recorder {
        async fn handle_event(&self, event: LedgerEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    const OWNER: Address = Address([1; 20]);
    const PUBLISHER: Address = Address([2; 20]);
    const STRANGER: Address = Address([3; 20]);

    fn fp() -> FingerprintKey {
        FingerprintKey::from_label("craftx")
    }

    fn date() -> AttestationDate {
        AttestationDate::from_ymd(2025, 8, 25).unwrap()
    }

    fn ctx(caller: Address) -> ExecutionContext {
        ExecutionContext::direct(caller, Utc::now())
    }

    async fn registered() -> AttestationLedgerState {
        let state = AttestationLedgerState::in_memory(OWNER);
        state.set_publisher(ctx(OWNER), fp(), PUBLISHER).await.unwrap();
        state
    }

    #[tokio::test]
    async fn attest_once_then_refuse() {
        let state = registered().await;
        let key = RecordKey::new(fp(), date());
        let root = Digest::of(b"root");

        let record = state.attest(ctx(PUBLISHER), fp(), date(), root, "build-7").await.unwrap();
        assert_eq!(state.key_state(&key), KeyState::Attested(record.clone()));

        let second = state.attest(ctx(PUBLISHER), fp(), date(), Digest::of(b"other"), "build-8").await;
        assert_eq!(second, Err(RejectReason::AlreadyAttested));
        assert_eq!(state.get_record(&key), Some(record));
        assert_eq!(state.record_count(), 1);
    }

    #[tokio::test]
    async fn unauthorized_caller_leaves_key_unset() {
        let state = registered().await;
        let key = RecordKey::new(fp(), date());

        let result = state.attest(ctx(STRANGER), fp(), date(), Digest::of(b"root"), "b").await;

        assert_eq!(result, Err(RejectReason::Unauthorized));
        assert_eq!(state.key_state(&key), KeyState::Unset);
    }

    #[tokio::test]
    async fn unregistered_fingerprint_refuses_everyone() {
        let state = AttestationLedgerState::in_memory(OWNER);
        let result = state.attest(ctx(OWNER), fp(), date(), Digest::of(b"root"), "b").await;
        assert_eq!(result, Err(RejectReason::Unauthorized));
    }

    #[tokio::test]
    async fn input_guards() {
        let state = registered().await;

        assert_eq!(
            state.attest(ctx(PUBLISHER), fp(), date(), Digest::ZERO, "b").await,
            Err(RejectReason::ZeroRoot)
        );
        assert_eq!(
            state.attest(ctx(PUBLISHER), fp(), date(), Digest::of(b"r"), "").await,
            Err(RejectReason::EmptyBatchId)
        );
        assert_eq!(state.record_count(), 0);
    }

    #[tokio::test]
    async fn only_owner_sets_publisher() {
        let state = registered().await;

        assert_eq!(
            state.set_publisher(ctx(PUBLISHER), fp(), STRANGER).await,
            Err(RejectReason::NotOwner)
        );
        assert_eq!(state.publisher_of(&fp()), Some(PUBLISHER));

        let previous = state.set_publisher(ctx(OWNER), fp(), STRANGER).await.unwrap();
        assert_eq!(previous, Some(PUBLISHER));
        assert_eq!(state.publisher_of(&fp()), Some(STRANGER));
    }

    #[tokio::test]
    async fn transitions_emit_events() {
        let recorder = Arc::new(Recorder::default());
        let state = AttestationLedgerState::in_memory(OWNER).with_event_handler(recorder.clone());

        state.set_publisher(ctx(OWNER), fp(), PUBLISHER).await.unwrap();
        state.attest(ctx(PUBLISHER), fp(), date(), Digest::of(b"root"), "build-7").await.unwrap();
        let _ = state.attest(ctx(STRANGER), fp(), date(), Digest::of(b"root"), "x").await;

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LedgerEvent::PublisherChanged(e) if e.previous.is_none()));
        assert!(matches!(&events[1], LedgerEvent::Attested(e) if e.batch_id == "build-7" && e.publisher == PUBLISHER));
    }

    #[tokio::test]
    async fn execute_dispatches_calls() {
        let state = AttestationLedgerState::in_memory(OWNER);
        let register = LedgerCall::SetPublisher { fingerprint: fp(), publisher: PUBLISHER };
        let attest = LedgerCall::Attest {
            fingerprint: fp(),
            date: date(),
            root: Digest::of(b"root"),
            batch_id: "b".into(),
        };

        state.execute(ctx(OWNER), &register).await.unwrap();
        state.execute(ctx(PUBLISHER), &attest).await.unwrap();
        assert_eq!(state.execute(ctx(PUBLISHER), &attest).await, Err(RejectReason::AlreadyAttested));
    }
}
