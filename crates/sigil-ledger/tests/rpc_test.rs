//! Integration tests for the JSON-RPC ledger gateway.
//!
//! Uses a wiremock node to check request shape, bearer authentication,
//! result decoding, and the mapping of HTTP and JSON-RPC failures onto the
//! ledger error taxonomy.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use sigil_core::{
    Address, AttestationDate, AttestationRecord, Digest, FingerprintKey, LedgerError,
    LedgerGateway, ReceiptStatus, RecordKey, RejectReason, TestClock,
};
use sigil_ledger::{rpc::codes, with_retry, GatewayConfig, RetryPolicy, RpcLedgerGateway};
use wiremock::{
    matchers::{body_partial_json, header, method},
    Mock, MockServer, ResponseTemplate,
};

fn gateway(server: &MockServer) -> RpcLedgerGateway {
    RpcLedgerGateway::new(GatewayConfig {
        url: server.uri(),
        timeout: Duration::from_secs(5),
        ..GatewayConfig::default()
    })
    .unwrap()
}

fn key() -> RecordKey {
    RecordKey::new(FingerprintKey::from_label("craftx"), AttestationDate::from_ymd(2025, 8, 25).unwrap())
}

fn result(value: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": value }))
}

fn rpc_error(code: i64, data: Option<Value>) -> ResponseTemplate {
    let mut error = json!({ "code": code, "message": "refused" });
    if let Some(data) = data {
        error["data"] = data;
    }
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "error": error }))
}

async fn height_error(template: ResponseTemplate) -> LedgerError {
    let server = MockServer::start().await;
    Mock::given(method("POST")).respond_with(template).mount(&server).await;
    gateway(&server).height().await.unwrap_err()
}

#[tokio::test]
async fn get_record_sends_named_params_and_decodes_record() {
    let server = MockServer::start().await;
    let key = key();
    let record = AttestationRecord {
        root: Digest::of(b"root"),
        batch_id: "build-7".to_string(),
        timestamp: Utc.with_ymd_and_hms(2025, 8, 25, 12, 0, 0).unwrap(),
        publisher: Address([7; 20]),
    };

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "attest_getRecord",
            "params": { "fingerprint": key.fingerprint, "date": key.date },
        })))
        .respond_with(result(serde_json::to_value(&record).unwrap()))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = gateway(&server).get_record(&key).await.unwrap();

    assert_eq!(fetched, Some(record));
}

#[tokio::test]
async fn unset_records_decode_as_none() {
    let server = MockServer::start().await;
    let zeroed = AttestationRecord {
        root: Digest::ZERO,
        batch_id: String::new(),
        timestamp: Utc.timestamp_opt(0, 0).unwrap(),
        publisher: Address::default(),
    };
    Mock::given(method("POST"))
        .respond_with(result(serde_json::to_value(&zeroed).unwrap()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST")).respond_with(result(Value::Null)).mount(&server).await;

    let gateway = gateway(&server);
    assert_eq!(gateway.get_record(&key()).await.unwrap(), None);
    assert_eq!(gateway.get_record(&key()).await.unwrap(), None);
}

#[tokio::test]
async fn zero_publisher_decodes_as_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "attest_getPublisher" })))
        .respond_with(result(json!(Address::default())))
        .mount(&server)
        .await;

    let publisher = gateway(&server).publisher_of(&key().fingerprint).await.unwrap();

    assert_eq!(publisher, None);
}

#[tokio::test]
async fn bearer_token_is_sent_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer node-secret"))
        .and(body_partial_json(json!({ "method": "attest_height" })))
        .respond_with(result(json!(42)))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = RpcLedgerGateway::new(GatewayConfig {
        url: server.uri(),
        auth_token: Some("node-secret".to_string()),
        ..GatewayConfig::default()
    })
    .unwrap();

    assert_eq!(gateway.height().await.unwrap(), 42);
}

#[tokio::test]
async fn receipt_decodes_rejected_status() {
    let server = MockServer::start().await;
    let tx_hash = Digest::of(b"tx");
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "attest_getReceipt", "params": { "tx_hash": tx_hash } })))
        .respond_with(result(json!({
            "tx_hash": tx_hash,
            "height": 9,
            "status": { "status": "rejected", "reason": "already_attested" },
        })))
        .mount(&server)
        .await;

    let receipt = gateway(&server).receipt(&tx_hash).await.unwrap().expect("receipt");

    assert_eq!(receipt.height, 9);
    assert_eq!(receipt.status, ReceiptStatus::Rejected(RejectReason::AlreadyAttested));
}

#[tokio::test]
async fn rpc_error_codes_map_to_ledger_errors() {
    assert!(matches!(height_error(rpc_error(codes::LIMIT_EXCEEDED, None)).await, LedgerError::RpcTransient { .. }));
    assert!(matches!(
        height_error(rpc_error(codes::INSUFFICIENT_FUNDS, None)).await,
        LedgerError::RpcFatal { .. }
    ));
    assert!(matches!(
        height_error(rpc_error(codes::INVALID_PARAMS, None)).await,
        LedgerError::RpcFatal { .. }
    ));
    assert!(matches!(
        height_error(rpc_error(codes::REJECTED, Some(json!("unauthorized")))).await,
        LedgerError::Unauthorized { .. }
    ));
    assert_eq!(
        height_error(rpc_error(codes::REJECTED, Some(json!("sequence_mismatch")))).await,
        LedgerError::Rejected { reason: RejectReason::SequenceMismatch }
    );
}

#[tokio::test]
async fn http_failures_map_to_ledger_errors() {
    assert!(height_error(ResponseTemplate::new(503)).await.is_retryable());
    assert!(height_error(ResponseTemplate::new(429)).await.is_retryable());
    assert!(!height_error(ResponseTemplate::new(401)).await.is_retryable());
    assert!(matches!(
        height_error(ResponseTemplate::new(200).set_body_string("not json")).await,
        LedgerError::RpcFatal { .. }
    ));
}

#[tokio::test]
async fn unreachable_node_is_transient() {
    let gateway = RpcLedgerGateway::new(GatewayConfig {
        url: "http://127.0.0.1:1".to_string(),
        timeout: Duration::from_secs(2),
        ..GatewayConfig::default()
    })
    .unwrap();

    let error = gateway.height().await.unwrap_err();

    assert!(matches!(error, LedgerError::RpcTransient { .. }), "got {error:?}");
}

#[tokio::test]
async fn transient_http_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST")).respond_with(result(json!(7))).mount(&server).await;

    let gateway = gateway(&server);
    let clock = TestClock::new();
    let height = with_retry(&RetryPolicy::default(), &clock, "height", || gateway.height())
        .await
        .unwrap();

    assert_eq!(height, 7);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn submit_posts_signed_transaction() {
    let server = MockServer::start().await;
    let identity = sigil_attestation::SigningIdentity::ephemeral();
    let call = sigil_core::LedgerCall::Attest {
        fingerprint: key().fingerprint,
        date: key().date,
        root: Digest::of(b"root"),
        batch_id: "build-7".to_string(),
    };
    let tx = sigil_core::TransactionSigner::sign(
        &identity,
        sigil_core::Transaction::new(identity.address(), 3, call),
    );
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "attest_sendTransaction" })))
        .respond_with(result(json!(tx.hash())))
        .expect(1)
        .mount(&server)
        .await;

    let tx_hash = gateway(&server).submit(&tx).await.unwrap();
    assert_eq!(tx_hash, tx.hash());

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    let sent: sigil_core::SignedTransaction =
        serde_json::from_value(body["params"]["transaction"].clone()).unwrap();
    assert_eq!(sent, tx);
    assert!(sent.verify());
}
