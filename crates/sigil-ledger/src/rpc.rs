//! JSON-RPC 2.0 ledger gateway over HTTP.
//!
//! Maps each `LedgerGateway` operation to one `attest_*` method and
//! classifies transport, HTTP and JSON-RPC failures into the ledger error
//! taxonomy so the client knows what is safe to retry.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use sigil_core::{
    Address, AttestationRecord, FingerprintKey, LedgerError, LedgerGateway, RecordKey,
    RejectReason, SignedTransaction, TxHash, TxReceipt,
};
use tracing::{debug, info_span, warn, Instrument};

/// JSON-RPC method names.
pub mod methods {
    /// Read a record by key.
    pub const GET_RECORD: &str = "attest_getRecord";
    /// Read the publisher of a fingerprint.
    pub const GET_PUBLISHER: &str = "attest_getPublisher";
    /// Read the next sequence number of an address.
    pub const GET_SEQUENCE: &str = "attest_getSequence";
    /// Submit a signed transaction.
    pub const SEND_TRANSACTION: &str = "attest_sendTransaction";
    /// Read a transaction receipt.
    pub const GET_RECEIPT: &str = "attest_getReceipt";
    /// Read the current height.
    pub const HEIGHT: &str = "attest_height";
}

/// JSON-RPC error codes with a defined meaning for the attestation client.
pub mod codes {
    /// Invalid method parameters; the request is malformed.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Node-side internal error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Request limit exceeded; back off and retry.
    pub const LIMIT_EXCEEDED: i64 = -32005;
    /// Sender cannot pay for the transaction.
    pub const INSUFFICIENT_FUNDS: i64 = -32010;
    /// State machine refused the call; `data` carries the reason.
    pub const REJECTED: i64 = -32020;
}

/// Connection settings for `RpcLedgerGateway`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// JSON-RPC endpoint.
    pub url: String,
    /// Bearer token sent as `Authorization`, if the node requires one.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            auth_token: None,
            timeout: Duration::from_secs(30),
            user_agent: concat!("sigil/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorObject {
    fn into_ledger_error(self) -> LedgerError {
        match self.code {
            codes::LIMIT_EXCEEDED | codes::INTERNAL_ERROR => {
                LedgerError::rpc_transient(format!("rpc error {}: {}", self.code, self.message))
            },
            codes::REJECTED => match self.data.map(serde_json::from_value::<RejectReason>) {
                Some(Ok(reason)) => LedgerError::rejected(reason),
                _ => LedgerError::rpc_fatal(format!("rejection without reason: {}", self.message)),
            },
            codes::INSUFFICIENT_FUNDS => {
                LedgerError::rpc_fatal(format!("insufficient funds: {}", self.message))
            },
            code => LedgerError::rpc_fatal(format!("rpc error {code}: {}", self.message)),
        }
    }
}

/// `LedgerGateway` backed by a JSON-RPC node.
#[derive(Debug)]
pub struct RpcLedgerGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    next_id: AtomicU64,
}

impl RpcLedgerGateway {
    /// Creates a gateway for `config.url`.
    ///
    /// # Errors
    ///
    /// Returns `RpcFatal` if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| LedgerError::rpc_fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config, next_id: AtomicU64::new(1) })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("ledger_rpc", method, id);

        async move {
            let mut request = self
                .client
                .post(&self.config.url)
                .json(&RpcRequest { jsonrpc: "2.0", id, method, params });
            if let Some(token) = &self.config.auth_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(classify_transport_error)?;
            let status = response.status();
            if !status.is_success() {
                warn!(status = status.as_u16(), "ledger node returned HTTP error");
                return Err(classify_status(status));
            }

            let body: RpcResponse = response
                .json()
                .await
                .map_err(|e| LedgerError::rpc_fatal(format!("malformed JSON-RPC response: {e}")))?;

            if let Some(error) = body.error {
                debug!(code = error.code, message = %error.message, "JSON-RPC error");
                return Err(error.into_ledger_error());
            }

            let result = body.result.unwrap_or(Value::Null);
            serde_json::from_value(result)
                .map_err(|e| LedgerError::rpc_fatal(format!("unexpected {method} result: {e}")))
        }
        .instrument(span)
        .await
    }
}

fn classify_transport_error(error: reqwest::Error) -> LedgerError {
    if error.is_timeout() {
        LedgerError::rpc_transient(format!("request timed out: {error}"))
    } else if error.is_connect() || error.is_request() {
        LedgerError::rpc_transient(format!("connection failed: {error}"))
    } else {
        LedgerError::rpc_fatal(error.to_string())
    }
}

fn classify_status(status: StatusCode) -> LedgerError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        LedgerError::rpc_transient(format!("HTTP {status}"))
    } else {
        LedgerError::rpc_fatal(format!("HTTP {status}"))
    }
}

#[async_trait]
impl LedgerGateway for RpcLedgerGateway {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<AttestationRecord>, LedgerError> {
        let record: Option<AttestationRecord> = self
            .call(methods::GET_RECORD, json!({ "fingerprint": key.fingerprint, "date": key.date }))
            .await?;
        // Contract storage answers unset keys with a zeroed record.
        Ok(record.filter(|record| !record.root.is_zero()))
    }

    async fn publisher_of(&self, fingerprint: &FingerprintKey) -> Result<Option<Address>, LedgerError> {
        let publisher: Option<Address> =
            self.call(methods::GET_PUBLISHER, json!({ "fingerprint": fingerprint })).await?;
        Ok(publisher.filter(|address| *address != Address::default()))
    }

    async fn next_sequence(&self, address: &Address) -> Result<u64, LedgerError> {
        self.call(methods::GET_SEQUENCE, json!({ "address": address })).await
    }

    async fn submit(&self, transaction: &SignedTransaction) -> Result<TxHash, LedgerError> {
        self.call(methods::SEND_TRANSACTION, json!({ "transaction": transaction })).await
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, LedgerError> {
        self.call(methods::GET_RECEIPT, json!({ "tx_hash": tx_hash })).await
    }

    async fn height(&self) -> Result<u64, LedgerError> {
        self.call(methods::HEIGHT, json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(code: i64, data: Option<Value>) -> LedgerError {
        RpcErrorObject { code, message: "boom".to_string(), data }.into_ledger_error()
    }

    #[test]
    fn rpc_error_codes_are_classified() {
        assert!(matches!(rpc_error(codes::LIMIT_EXCEEDED, None), LedgerError::RpcTransient { .. }));
        assert!(matches!(rpc_error(codes::INSUFFICIENT_FUNDS, None), LedgerError::RpcFatal { .. }));
        assert!(matches!(rpc_error(codes::INVALID_PARAMS, None), LedgerError::RpcFatal { .. }));
        assert!(matches!(
            rpc_error(codes::REJECTED, Some(json!("unauthorized"))),
            LedgerError::Unauthorized { .. }
        ));
        assert_eq!(
            rpc_error(codes::REJECTED, Some(json!("already_attested"))),
            LedgerError::Rejected { reason: RejectReason::AlreadyAttested }
        );
        assert!(matches!(rpc_error(codes::REJECTED, None), LedgerError::RpcFatal { .. }));
    }

    #[test]
    fn http_status_classification() {
        assert!(classify_status(StatusCode::BAD_GATEWAY).is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED).is_retryable());
        assert!(!classify_status(StatusCode::NOT_FOUND).is_retryable());
    }
}
