//! Builder for `TestEnv`.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use sigil_attestation::SigningIdentity;
use sigil_core::{AttestationDate, Clock, FingerprintKey, TestClock};
use sigil_ledger::{
    BackoffStrategy, ClientConfig, ExecutionContext, InMemoryLedger, RetryPolicy,
};

use crate::TestEnv;

/// Configures a `TestEnv` before it is built.
pub struct TestEnvBuilder {
    start: Option<DateTime<Utc>>,
    fingerprint: String,
    register_publisher: bool,
    client_config: ClientConfig,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            start: None,
            fingerprint: "craftx".to_string(),
            register_publisher: true,
            client_config: ClientConfig {
                confirmations: 1,
                poll_interval: Duration::from_secs(1),
                confirmation_timeout: Duration::from_secs(30),
                retry_policy: fast_retry_policy(),
            },
        }
    }
}

/// Retry policy without jitter, so tests can predict backoff.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter_factor: 0.0,
        backoff_strategy: BackoffStrategy::Exponential,
    }
}

impl TestEnvBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the virtual clock at `start` (default 2025-08-25 12:00 UTC).
    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Label of the default attestation stream.
    pub fn fingerprint(mut self, label: impl Into<String>) -> Self {
        self.fingerprint = label.into();
        self
    }

    /// Leaves the fingerprint without a registered publisher.
    pub fn without_publisher(mut self) -> Self {
        self.register_publisher = false;
        self
    }

    /// Confirmations clients wait for.
    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.client_config.confirmations = confirmations;
        self
    }

    /// Replaces the client configuration.
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    /// Builds the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the publisher cannot be registered.
    pub async fn build(self) -> anyhow::Result<TestEnv> {
        let start = match self.start {
            Some(start) => start,
            None => Utc
                .with_ymd_and_hms(2025, 8, 25, 12, 0, 0)
                .single()
                .context("invalid default start time")?,
        };
        let clock = TestClock::starting_at(start);
        let owner = SigningIdentity::ephemeral();
        let publisher = SigningIdentity::ephemeral();
        let fingerprint = FingerprintKey::from_label(&self.fingerprint);
        let date = AttestationDate::from_datetime(&start);

        let ledger = Arc::new(InMemoryLedger::new(owner.address(), Arc::new(clock.clone())));
        if self.register_publisher {
            ledger
                .state()
                .set_publisher(
                    ExecutionContext::direct(owner.address(), clock.now_utc()),
                    fingerprint,
                    publisher.address(),
                )
                .await
                .context("failed to register test publisher")?;
        }

        Ok(TestEnv {
            clock,
            ledger,
            owner,
            publisher,
            fingerprint,
            date,
            client_config: self.client_config,
        })
    }
}
