//! Configuration
//!
//! Everything the core needs is read once, at startup, into these structs and
//! injected at construction time.

use std::time::Duration;

use crate::error::{PaymentError, Result};

/// Bounded retry with linearly increasing backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Sleep before attempt `n` (0-based) is `n * backoff_step`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Payment gateway connection settings
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// API base URL
    pub base_url: String,

    /// Secret API key (basic-auth username)
    pub secret_key: String,

    /// Wallet channel, e.g. `PH_GCASH`
    pub channel_code: String,

    /// Timeout for charge/invoice creation (may include fraud scoring)
    pub charge_timeout: Duration,

    /// Timeout for disbursement creation
    pub disbursement_timeout: Duration,

    /// Timeout for status lookups
    pub status_timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.xendit.co".into(),
            secret_key: String::new(),
            channel_code: "PH_GCASH".into(),
            charge_timeout: Duration::from_secs(30),
            disbursement_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let secret_key = required("GATEWAY_SECRET_KEY")?;
        let defaults = Self::default();

        Ok(Self {
            base_url: optional("GATEWAY_BASE_URL").unwrap_or(defaults.base_url),
            secret_key,
            channel_code: optional("GATEWAY_CHANNEL_CODE").unwrap_or(defaults.channel_code),
            charge_timeout: secs("GATEWAY_CHARGE_TIMEOUT_SECS")?.unwrap_or(defaults.charge_timeout),
            disbursement_timeout: secs("GATEWAY_DISBURSEMENT_TIMEOUT_SECS")?
                .unwrap_or(defaults.disbursement_timeout),
            status_timeout: secs("GATEWAY_STATUS_TIMEOUT_SECS")?.unwrap_or(defaults.status_timeout),
            retry: RetryPolicy {
                max_attempts: parsed("GATEWAY_MAX_ATTEMPTS")?
                    .unwrap_or(defaults.retry.max_attempts),
                backoff_step: secs("GATEWAY_BACKOFF_STEP_SECS")?
                    .unwrap_or(defaults.retry.backoff_step),
            },
        })
    }
}

/// Which gateway product collects the payer's funds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FundingProduct {
    /// Direct e-wallet charge with a checkout URL
    #[default]
    EwalletCharge,
    /// Hosted invoice, requires a payer email
    Invoice,
}

impl std::str::FromStr for FundingProduct {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "charge" | "ewallet" | "ewallet_charge" => Ok(FundingProduct::EwalletCharge),
            "invoice" => Ok(FundingProduct::Invoice),
            other => Err(PaymentError::Config(format!("unknown funding product {other:?}"))),
        }
    }
}

/// Orchestrator settings
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// ISO currency for every request
    pub currency: String,

    /// Prefix replacing the leading `0` of a wallet number
    pub dial_code: String,

    /// Base URL the gateway redirects/calls back to
    pub callback_base_url: String,

    pub funding: FundingProduct,

    /// Per-call budget for store operations
    pub store_timeout: Duration,

    /// Age before reconciliation touches an unfinished intent or payout claim
    pub reconcile_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            currency: "PHP".into(),
            dial_code: "+63".into(),
            callback_base_url: "http://localhost:3000".into(),
            funding: FundingProduct::EwalletCharge,
            store_timeout: Duration::from_secs(5),
            reconcile_grace: Duration::from_secs(120),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let funding = match optional("FUNDING_PRODUCT") {
            Some(v) => v.parse()?,
            None => defaults.funding,
        };

        Ok(Self {
            currency: optional("PAYMENT_CURRENCY").unwrap_or(defaults.currency),
            dial_code: optional("WALLET_DIAL_CODE").unwrap_or(defaults.dial_code),
            callback_base_url: required("CALLBACK_BASE_URL")?,
            funding,
            store_timeout: secs("STORE_TIMEOUT_SECS")?.unwrap_or(defaults.store_timeout),
            reconcile_grace: secs("RECONCILE_GRACE_SECS")?.unwrap_or(defaults.reconcile_grace),
        })
    }

    pub fn success_url(&self) -> String {
        format!("{}/success", self.callback_base_url.trim_end_matches('/'))
    }

    pub fn failure_url(&self) -> String {
        format!("{}/failure", self.callback_base_url.trim_end_matches('/'))
    }
}

/// Aggregate configuration for the payments core
#[derive(Clone, Debug)]
pub struct PaymentsConfig {
    pub gateway: GatewayConfig,
    pub orchestrator: OrchestratorConfig,

    /// Expected `x-callback-token` on inbound webhooks
    pub callback_token: String,
}

impl PaymentsConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            gateway: GatewayConfig::from_env()?,
            orchestrator: OrchestratorConfig::from_env()?,
            callback_token: required("GATEWAY_CALLBACK_TOKEN")?,
        })
    }
}

fn required(key: &str) -> Result<String> {
    optional(key).ok_or_else(|| PaymentError::Config(format!("{key} not set")))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parsed value of `key`; set but malformed is an error, not the default
fn parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    parse_value(key, optional(key))
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.trim()
            .parse()
            .map_err(|e| PaymentError::Config(format!("{key}={v:?}: {e}")))
    })
    .transpose()
}

fn secs(key: &str) -> Result<Option<Duration>> {
    Ok(parsed::<u64>(key)?.map(Duration::from_secs))
}
