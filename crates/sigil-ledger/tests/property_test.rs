//! Property-based tests for the ledger state machine and retry policy.
//!
//! Drives arbitrary interleavings of publisher and stranger writes against
//! one key and checks write-once and authorization; checks retry delays stay
//! bounded and the attempt budget is honoured.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::{prelude::*, test_runner::Config as ProptestConfig};
use sigil_core::{
    Address, AttestationDate, Digest, FingerprintKey, LedgerError, RecordKey, RejectReason,
};
use sigil_ledger::{
    AttestationLedgerState, BackoffStrategy, ExecutionContext, KeyState, RetryDecision, RetryPolicy,
};

fn proptest_config() -> ProptestConfig {
    let is_ci = std::env::var("CI").unwrap_or_default() == "true";
    let default_cases = if is_ci { 100 } else { 20 };

    let cases =
        std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(default_cases);

    ProptestConfig::with_cases(cases)
}

const OWNER: Address = Address([1; 20]);
const PUBLISHER: Address = Address([2; 20]);
const STRANGER: Address = Address([3; 20]);

/// One attempted write: who sends it and which root it carries.
#[derive(Debug, Clone)]
struct Attempt {
    from_publisher: bool,
    root_seed: u8,
}

fn attempts() -> impl Strategy<Value = Vec<Attempt>> {
    prop::collection::vec(
        (any::<bool>(), any::<u8>()).prop_map(|(from_publisher, root_seed)| Attempt { from_publisher, root_seed }),
        1..12,
    )
}

fn strategy() -> impl Strategy<Value = BackoffStrategy> {
    prop_oneof![
        Just(BackoffStrategy::Fixed),
        Just(BackoffStrategy::Linear),
        Just(BackoffStrategy::Exponential),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Only the first authorized write lands; later writes and every
    /// stranger write are refused and leave the record untouched.
    #[test]
    fn records_are_write_once_and_publisher_only(attempts in attempts()) {
        let outcome: Result<(), TestCaseError> = runtime().block_on(async {
            let state = AttestationLedgerState::in_memory(OWNER);
            let now = Utc.with_ymd_and_hms(2025, 8, 25, 12, 0, 0).unwrap();
            let fingerprint = FingerprintKey::from_label("craftx");
            let date = AttestationDate::from_datetime(&now);
            let key = RecordKey::new(fingerprint, date);
            state
                .set_publisher(ExecutionContext::direct(OWNER, now), fingerprint, PUBLISHER)
                .await
                .unwrap();

            let mut first = None;
            for attempt in &attempts {
                let caller = if attempt.from_publisher { PUBLISHER } else { STRANGER };
                let root = Digest::of(&[attempt.root_seed]);
                let result = state
                    .attest(ExecutionContext::direct(caller, now), fingerprint, date, root, "build-7")
                    .await;

                match (attempt.from_publisher, &first) {
                    (false, _) => prop_assert_eq!(result, Err(RejectReason::Unauthorized)),
                    (true, None) => first = Some(result.unwrap()),
                    (true, Some(_)) => prop_assert_eq!(result, Err(RejectReason::AlreadyAttested)),
                }
                prop_assert_eq!(state.get_record(&key), first.clone());
            }

            let expected = first.clone().map_or(KeyState::Unset, KeyState::Attested);
            prop_assert_eq!(state.key_state(&key), expected);
            prop_assert_eq!(state.record_count(), usize::from(first.is_some()));
            Ok(())
        });
        outcome?;
    }

    /// No computed delay exceeds the cap, whatever the strategy or jitter.
    #[test]
    fn retry_delays_never_exceed_cap(
        attempt in 1u32..40,
        base_ms in 1u64..5_000,
        max_ms in 1u64..60_000,
        jitter in 0.0f64..=1.0,
        backoff in strategy(),
    ) {
        let policy = RetryPolicy {
            max_attempts: 50,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_factor: jitter,
            backoff_strategy: backoff,
        };

        prop_assert!(policy.calculate_delay(attempt) <= policy.max_delay);
    }

    /// Retryable failures get exactly `max_attempts - 1` retries.
    #[test]
    fn retry_budget_is_honoured(max_attempts in 1u32..10) {
        let policy = RetryPolicy { max_attempts, jitter_factor: 0.0, ..RetryPolicy::default() };
        let error = LedgerError::rpc_transient("node busy");

        let retries = (1..=max_attempts + 1)
            .take_while(|attempt| matches!(policy.decide(*attempt, &error), RetryDecision::Retry { .. }))
            .count();

        prop_assert_eq!(retries, (max_attempts - 1) as usize);
        let gave_up = matches!(policy.decide(max_attempts, &error), RetryDecision::GiveUp { .. });
        prop_assert!(gave_up);
    }
}
