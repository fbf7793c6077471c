//! Test infrastructure for deterministic sealing and anchoring tests.
//!
//! Wires a virtual clock, an in-memory ledger with a registered publisher,
//! and temp-dir artifact fixtures so integration tests can run the full
//! seal, anchor and verify cycle without a network or wall-clock waits.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use sigil_attestation::{Sealer, SigningIdentity, VerificationService};
use sigil_core::{AttestationDate, Clock, FingerprintKey, LedgerGateway, RecordKey, TestClock};
use sigil_ledger::{AttestationClient, ClientConfig, InMemoryLedger};

pub mod fixtures;
pub mod strategies;

mod env_core;

pub use env_core::TestEnvBuilder;
pub use fixtures::ArtifactDir;

/// Test environment around an `InMemoryLedger`.
///
/// The owner identity administers the ledger; the publisher identity is
/// registered for `fingerprint` unless the builder disabled it.
pub struct TestEnv {
    /// Virtual clock shared by the ledger, sealer and clients.
    pub clock: TestClock,
    /// Ledger under test.
    pub ledger: Arc<InMemoryLedger>,
    /// Ledger owner.
    pub owner: SigningIdentity,
    /// Registered publisher for `fingerprint`.
    pub publisher: SigningIdentity,
    /// Attestation stream used by default.
    pub fingerprint: FingerprintKey,
    /// Date used by default when anchoring.
    pub date: AttestationDate,
    client_config: ClientConfig,
}

impl TestEnv {
    /// Creates an environment with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if publisher registration fails.
    pub async fn new() -> anyhow::Result<Self> {
        TestEnvBuilder::new().build().await
    }

    /// Creates a builder for custom environments.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// Ledger as a gateway trait object.
    pub fn gateway(&self) -> Arc<dyn LedgerGateway> {
        self.ledger.clone()
    }

    /// Shared clock as a trait object.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// Client configuration used by `client` and `client_for`.
    pub fn client_config(&self) -> &ClientConfig {
        &self.client_config
    }

    /// Client signing as the registered publisher.
    pub fn client(&self) -> AttestationClient {
        self.client_for(&self.publisher)
    }

    /// Client signing as the ledger owner.
    pub fn owner_client(&self) -> AttestationClient {
        self.client_for(&self.owner)
    }

    /// Client signing as `identity`, with its own submission queue.
    pub fn client_for(&self, identity: &SigningIdentity) -> AttestationClient {
        self.client_with(identity, self.client_config.clone())
    }

    /// Client signing as `identity` with a custom configuration.
    pub fn client_with(&self, identity: &SigningIdentity, config: ClientConfig) -> AttestationClient {
        AttestationClient::new(self.gateway(), Arc::new(identity.clone()), self.clock(), config)
    }

    /// Sealer stamping batches with the virtual clock.
    pub fn sealer(&self) -> Sealer {
        Sealer::default().with_clock(self.clock())
    }

    /// Verifier reading from the ledger.
    pub fn verifier(&self) -> VerificationService {
        VerificationService::new(self.gateway())
    }

    /// Record key for the default fingerprint and date.
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.fingerprint, self.date)
    }

    /// Advances the virtual clock.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }
}
