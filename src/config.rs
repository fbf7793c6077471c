//! Configuration for the sigil command line.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use sigil_attestation::{seal::DEFAULT_HASH_CONCURRENCY, AuditTrail, SigningIdentity};
use sigil_ledger::{BackoffStrategy, ClientConfig, GatewayConfig, RetryPolicy};

/// Default configuration file, read from the working directory if present.
pub const CONFIG_FILE: &str = "sigil.toml";

/// Prefix for environment overrides, e.g. `SIGIL_LEDGER_URL`.
pub const ENV_PREFIX: &str = "SIGIL_";

/// Complete CLI configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `SIGIL_` (highest priority)
/// 2. Configuration file (`sigil.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Secrets (`signing_key`, `ledger_auth_token`) have no defaults and should
/// come from the environment.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    // Ledger
    /// JSON-RPC endpoint of the ledger node.
    ///
    /// Environment variable: `SIGIL_LEDGER_URL`
    #[serde(default = "default_ledger_url")]
    pub ledger_url: String,
    /// Bearer token for the ledger node, if it requires one.
    ///
    /// Environment variable: `SIGIL_LEDGER_AUTH_TOKEN`
    #[serde(default)]
    pub ledger_auth_token: Option<String>,
    /// Hex-encoded Ed25519 secret key of the signing identity.
    ///
    /// Environment variable: `SIGIL_SIGNING_KEY`
    #[serde(default)]
    pub signing_key: Option<String>,
    /// Default attestation stream label.
    ///
    /// Environment variable: `SIGIL_FINGERPRINT`
    #[serde(default = "default_fingerprint")]
    pub fingerprint: String,

    // Confirmation
    /// Confirmations required before an anchor counts as done.
    ///
    /// Environment variable: `SIGIL_CONFIRMATIONS`
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Delay between confirmation polls in milliseconds.
    ///
    /// Environment variable: `SIGIL_POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum wait for confirmations in seconds.
    ///
    /// Environment variable: `SIGIL_CONFIRMATION_TIMEOUT_SECS`
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Per-request timeout for ledger calls in seconds.
    ///
    /// Environment variable: `SIGIL_REQUEST_TIMEOUT_SECS`
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // Retry
    /// Maximum attempts per ledger call.
    ///
    /// Environment variable: `SIGIL_MAX_RETRY_ATTEMPTS`
    #[serde(default = "default_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff in milliseconds.
    ///
    /// Environment variable: `SIGIL_RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    ///
    /// Environment variable: `SIGIL_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `SIGIL_RETRY_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor")]
    pub retry_jitter_factor: f64,

    // Sealing
    /// Artifacts hashed in parallel.
    ///
    /// Environment variable: `SIGIL_HASH_CONCURRENCY`
    #[serde(default = "default_hash_concurrency")]
    pub hash_concurrency: usize,
    /// CSV audit trail appended by `seal` and `anchor`.
    ///
    /// Environment variable: `SIGIL_AUDIT_LOG_PATH`
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: String,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `SIGIL_RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `file` (normally `sigil.toml`),
    /// and `SIGIL_*` environment variables. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_from(file: &Path) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.confirmations == 0 {
            anyhow::bail!("confirmations must be greater than 0");
        }

        if self.max_retry_attempts == 0 {
            anyhow::bail!("max_retry_attempts must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.hash_concurrency == 0 {
            anyhow::bail!("hash_concurrency must be greater than 0");
        }

        if self.fingerprint.trim().is_empty() {
            anyhow::bail!("fingerprint must not be empty");
        }

        let url = reqwest::Url::parse(&self.ledger_url)
            .with_context(|| format!("ledger_url is not a valid URL: {}", self.ledger_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("ledger_url must use http or https");
        }

        Ok(())
    }

    /// Converts to the attestation client's configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            confirmations: self.confirmations,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            retry_policy: self.to_retry_policy(),
        }
    }

    /// Converts to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    /// Converts to JSON-RPC gateway settings.
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.ledger_url.clone(),
            auth_token: self.ledger_auth_token.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            ..GatewayConfig::default()
        }
    }

    /// Audit trail handle.
    pub fn audit_trail(&self) -> AuditTrail {
        AuditTrail::new(&self.audit_log_path)
    }

    /// Loads the configured signing identity.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is configured or it is malformed.
    pub fn signing_identity(&self) -> Result<SigningIdentity> {
        let key = self
            .signing_key
            .as_deref()
            .context("no signing key configured; set SIGIL_SIGNING_KEY")?;
        SigningIdentity::from_hex(key).context("invalid signing key")
    }

    /// Signing key for logging: `***` when set.
    pub fn signing_key_masked(&self) -> &'static str {
        mask(self.signing_key.as_deref())
    }
}

fn mask(secret: Option<&str>) -> &'static str {
    match secret {
        Some(_) => "***",
        None => "<unset>",
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("ledger_url", &self.ledger_url)
            .field("ledger_auth_token", &mask(self.ledger_auth_token.as_deref()))
            .field("signing_key", &self.signing_key_masked())
            .field("fingerprint", &self.fingerprint)
            .field("confirmations", &self.confirmations)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("retry_jitter_factor", &self.retry_jitter_factor)
            .field("hash_concurrency", &self.hash_concurrency)
            .field("audit_log_path", &self.audit_log_path)
            .field("rust_log", &self.rust_log)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_url: default_ledger_url(),
            ledger_auth_token: None,
            signing_key: None,
            fingerprint: default_fingerprint(),
            confirmations: default_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: default_jitter_factor(),
            hash_concurrency: default_hash_concurrency(),
            audit_log_path: default_audit_log_path(),
            rust_log: default_log_level(),
        }
    }
}

fn default_ledger_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_fingerprint() -> String {
    "default".to_string()
}

fn default_confirmations() -> u64 {
    2
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_confirmation_timeout_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_hash_concurrency() -> usize {
    DEFAULT_HASH_CONCURRENCY
}

fn default_audit_log_path() -> String {
    AuditTrail::DEFAULT_PATH.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
