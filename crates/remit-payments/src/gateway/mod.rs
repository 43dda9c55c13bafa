//! Payment Gateway Integration
//!
//! The [`PaymentGateway`] trait is the only way the orchestrator talks to the
//! external payment service. Statuses are normalized here so that gateway
//! vocabulary never leaks into the state machine.

mod mock;
mod xendit;

pub use mock::MockGateway;
pub use xendit::XenditClient;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{FundingProduct, RetryPolicy};
use crate::error::{PaymentError, Result};
use crate::model::{DisbursementStatus, FundingRef, PaymentStatus};

/// Max bytes of a gateway response body kept in errors and logs
const BODY_SNIPPET_LEN: usize = 512;

/// Redirect targets handed to the gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallbackUrls {
    pub success: String,
    pub failure: String,
}

/// E-wallet charge against the payer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub reference_id: String,
    pub amount: Decimal,
    pub currency: String,
    /// Payer's mobile number in international form
    pub mobile_number: String,
    pub title: String,
    pub description: String,
    pub callbacks: CallbackUrls,
}

/// Hosted invoice sent to the payer's email
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub reference_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub payer_email: String,
    pub description: String,
    pub callbacks: CallbackUrls,
}

/// Payout to the payee's wallet
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub reference_id: String,
    pub account_number: String,
    pub account_holder_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
}

/// Gateway status after mapping into local vocabulary
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Normalized<T> {
    pub value: T,

    /// Status string as the gateway sent it
    pub raw: String,

    /// `true` when `raw` was unknown and `value` is the safe default
    pub coerced: bool,
}

/// Result of creating a charge or an invoice
#[derive(Clone, Debug)]
pub struct FundingCreated {
    pub funding: FundingRef,
    pub checkout_url: String,
    pub status: Normalized<PaymentStatus>,
}

/// Result of creating a disbursement
#[derive(Clone, Debug)]
pub struct DisbursementCreated {
    pub id: String,
    pub status: Normalized<DisbursementStatus>,
}

/// Payment gateway trait (Strategy pattern)
///
/// Implementations must retry internally and return
/// [`PaymentError::Upstream`] once retries are exhausted.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create an e-wallet charge; returns its id and checkout URL
    async fn create_charge(&self, request: &ChargeRequest) -> Result<FundingCreated>;

    /// Create a hosted invoice; returns its id and invoice URL
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<FundingCreated>;

    /// Look up the current status of a charge
    async fn get_charge_status(&self, charge_id: &str) -> Result<Normalized<PaymentStatus>>;

    /// Find the charge or invoice created for `reference_id`
    ///
    /// `None` means the gateway has no record of it.
    async fn find_funding(
        &self,
        product: FundingProduct,
        reference_id: &str,
    ) -> Result<Option<FundingCreated>>;

    /// Create a disbursement to a wallet
    ///
    /// Repeating a request with the same `reference_id` returns the
    /// disbursement created the first time.
    async fn create_disbursement(
        &self,
        request: &DisbursementRequest,
    ) -> Result<DisbursementCreated>;

    /// Gateway name
    fn name(&self) -> &str;
}

/// Map a charge/invoice status; unknown values stay PENDING
pub fn normalize_charge_status(raw: &str) -> Normalized<PaymentStatus> {
    let known = match raw.trim().to_uppercase().as_str() {
        "PENDING" => Some(PaymentStatus::Pending),
        "SUCCEEDED" | "PAID" | "SETTLED" => Some(PaymentStatus::Succeeded),
        "EXPIRED" => Some(PaymentStatus::Expired),
        _ => None,
    };
    normalized(raw, known, PaymentStatus::Pending, "charge")
}

/// Map a disbursement status; unknown values become SUCCEEDED
pub fn normalize_disbursement_status(raw: &str) -> Normalized<DisbursementStatus> {
    let known = match raw.trim().to_uppercase().as_str() {
        "PENDING" | "ACCEPTED" | "REQUESTED" => Some(DisbursementStatus::Pending),
        "SUCCEEDED" | "COMPLETED" => Some(DisbursementStatus::Succeeded),
        _ => None,
    };
    normalized(raw, known, DisbursementStatus::Succeeded, "disbursement")
}

fn normalized<T: Copy + std::fmt::Debug>(
    raw: &str,
    known: Option<T>,
    fallback: T,
    kind: &'static str,
) -> Normalized<T> {
    match known {
        Some(value) => Normalized {
            value,
            raw: raw.to_string(),
            coerced: false,
        },
        None => {
            tracing::warn!(
                kind,
                raw_status = %raw,
                coerced_to = ?fallback,
                status_coerced = true,
                "Unrecognized gateway status, using safe default"
            );
            Normalized {
                value: fallback,
                raw: raw.to_string(),
                coerced: true,
            }
        }
    }
}

/// Raw HTTP outcome of one attempt
#[derive(Clone, Debug)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Run `send` until it answers with an allow-listed status
///
/// Each attempt is bounded by `timeout`. Transport errors, timeouts and
/// non-allow-listed statuses all consume an attempt.
pub(crate) async fn send_with_retry<F, Fut>(
    operation: &'static str,
    retry: &RetryPolicy,
    timeout: Duration,
    allowed: &[u16],
    mut send: F,
) -> Result<RawResponse>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<RawResponse, String>>,
{
    let attempts = retry.max_attempts.max(1);
    let mut last_status = None;
    let mut last_body = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(retry.backoff_before(attempt)).await;
        }

        match tokio::time::timeout(timeout, send()).await {
            Ok(Ok(response)) if allowed.contains(&response.status) => return Ok(response),
            Ok(Ok(response)) => {
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    status = response.status,
                    body = %snippet(&response.body),
                    "Gateway answered outside allow-list"
                );
                last_status = Some(response.status);
                last_body = snippet(&response.body);
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    error = %e,
                    "Gateway request failed"
                );
                last_status = None;
                last_body = e;
            }
            Err(_) => {
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    ?timeout,
                    "Gateway request timed out"
                );
                last_status = None;
                last_body = format!("timed out after {timeout:?}");
            }
        }
    }

    Err(PaymentError::Upstream {
        operation,
        attempts,
        status: last_status,
        body: last_body,
    })
}

pub(crate) fn snippet(body: &str) -> String {
    if body.len() <= BODY_SNIPPET_LEN {
        return body.to_string();
    }
    let mut end = BODY_SNIPPET_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
