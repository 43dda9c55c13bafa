//! Xendit Gateway Client
//!
//! E-wallet charges, invoices and disbursements over the Xendit REST API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    normalize_charge_status, normalize_disbursement_status, send_with_retry, snippet,
    ChargeRequest, DisbursementCreated, DisbursementRequest, FundingCreated, InvoiceRequest,
    Normalized, PaymentGateway, RawResponse,
};
use crate::config::{FundingProduct, GatewayConfig};
use crate::error::{PaymentError, Result};
use crate::model::{FundingRef, PaymentStatus};
use crate::redact;

const CHARGE_OK: &[u16] = &[200, 201, 202];
const INVOICE_OK: &[u16] = &[200, 201];
const STATUS_OK: &[u16] = &[200];
const DISBURSEMENT_OK: &[u16] = &[200, 201, 202];

/// Xendit client wrapper
pub struct XenditClient {
    http: Client,
    config: GatewayConfig,
    coerced: AtomicU64,
}

impl XenditClient {
    /// Create a new client from explicit configuration
    pub fn new(config: GatewayConfig) -> Result<Self> {
        if config.secret_key.is_empty() {
            return Err(PaymentError::Config("gateway secret key is empty".into()));
        }
        let http = Client::builder()
            .build()
            .map_err(|e| PaymentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            coerced: AtomicU64::new(0),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    /// Number of gateway statuses replaced by a safe default so far
    pub fn coerced_status_count(&self) -> u64 {
        self.coerced.load(Ordering::Relaxed)
    }

    fn track<T>(&self, status: Normalized<T>) -> Normalized<T> {
        if status.coerced {
            self.coerced.fetch_add(1, Ordering::Relaxed);
        }
        status
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize + Sync>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
        timeout: Duration,
        allowed: &[u16],
        idempotency_key: Option<&str>,
    ) -> Result<RawResponse> {
        tracing::debug!(
            operation,
            body = %redact::redacted_string(body),
            "Sending gateway request"
        );

        let url = self.url(path);
        send_with_retry(operation, &self.config.retry, timeout, allowed, || {
            let mut request = self
                .http
                .post(&url)
                .basic_auth(&self.config.secret_key, Some(""))
                .json(body);
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-key", key);
            }
            execute(request)
        })
        .await
    }

    async fn get(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<RawResponse> {
        let url = self.url(path);
        send_with_retry(
            operation,
            &self.config.retry,
            self.config.status_timeout,
            STATUS_OK,
            || {
                execute(
                    self.http
                        .get(&url)
                        .basic_auth(&self.config.secret_key, Some(""))
                        .query(query),
                )
            },
        )
        .await
    }

    fn charge_created(&self, charge: ChargeResponse) -> Option<FundingCreated> {
        let checkout_url = charge.actions.and_then(ChargeActions::best_url)?;
        Some(FundingCreated {
            funding: FundingRef::Charge(charge.id),
            checkout_url,
            status: self.track(normalize_charge_status(&charge.status)),
        })
    }

    fn invoice_created(&self, invoice: InvoiceResponse) -> FundingCreated {
        FundingCreated {
            funding: FundingRef::Invoice(invoice.id),
            checkout_url: invoice.invoice_url,
            status: self.track(normalize_charge_status(&invoice.status)),
        }
    }
}

async fn execute(request: RequestBuilder) -> std::result::Result<RawResponse, String> {
    let response = request.send().await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| e.to_string())?;
    Ok(RawResponse { status, body })
}

fn decode<T: DeserializeOwned>(operation: &'static str, raw: &RawResponse) -> Result<T> {
    serde_json::from_str(&raw.body).map_err(|e| PaymentError::Upstream {
        operation,
        attempts: 1,
        status: Some(raw.status),
        body: format!("undecodable response ({e}): {}", snippet(&raw.body)),
    })
}

#[async_trait]
impl PaymentGateway for XenditClient {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<FundingCreated> {
        let body = ChargeBody {
            reference_id: &request.reference_id,
            currency: &request.currency,
            amount: request.amount,
            checkout_method: "ONE_TIME_PAYMENT",
            channel_code: &self.config.channel_code,
            channel_properties: ChannelProperties {
                mobile_number: &request.mobile_number,
                success_redirect_url: &request.callbacks.success,
                failure_redirect_url: &request.callbacks.failure,
            },
            metadata: ChargeMetadata {
                title: &request.title,
                description: &request.description,
            },
        };

        let raw = self
            .post(
                "create_charge",
                "/ewallets/charges",
                &body,
                self.config.charge_timeout,
                CHARGE_OK,
                None,
            )
            .await?;
        let charge: ChargeResponse = decode("create_charge", &raw)?;
        tracing::info!(charge_id = %charge.id, status = %charge.status, "Charge created");

        self.charge_created(charge)
            .ok_or_else(|| PaymentError::Upstream {
                operation: "create_charge",
                attempts: 1,
                status: Some(raw.status),
                body: "no checkout URL in charge response".into(),
            })
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<FundingCreated> {
        let body = InvoiceBody {
            external_id: &request.reference_id,
            amount: request.amount,
            currency: &request.currency,
            description: &request.description,
            payer_email: &request.payer_email,
            success_redirect_url: &request.callbacks.success,
            failure_redirect_url: &request.callbacks.failure,
        };

        let raw = self
            .post(
                "create_invoice",
                "/v2/invoices",
                &body,
                self.config.charge_timeout,
                INVOICE_OK,
                None,
            )
            .await?;
        let invoice: InvoiceResponse = decode("create_invoice", &raw)?;
        tracing::info!(invoice_id = %invoice.id, status = %invoice.status, "Invoice created");

        Ok(self.invoice_created(invoice))
    }

    async fn get_charge_status(&self, charge_id: &str) -> Result<Normalized<PaymentStatus>> {
        let path = format!("/ewallets/charges/{charge_id}");
        let raw = self.get("get_charge_status", &path, &[]).await?;
        let charge: ChargeStatusResponse = decode("get_charge_status", &raw)?;

        Ok(self.track(normalize_charge_status(&charge.status)))
    }

    async fn find_funding(
        &self,
        product: FundingProduct,
        reference_id: &str,
    ) -> Result<Option<FundingCreated>> {
        let found = match product {
            FundingProduct::EwalletCharge => {
                let raw = self
                    .get(
                        "find_charge",
                        "/ewallets/charges",
                        &[("reference_id", reference_id)],
                    )
                    .await?;
                let list: ChargeList = decode("find_charge", &raw)?;
                list.data
                    .into_iter()
                    .find(|c| c.reference_id.as_deref() == Some(reference_id))
                    .map(|charge| {
                        let id = charge.id.clone();
                        self.charge_created(charge).unwrap_or_else(|| {
                            tracing::warn!(charge_id = %id, "Found charge has no checkout URL");
                            FundingCreated {
                                funding: FundingRef::Charge(id),
                                checkout_url: String::new(),
                                status: normalize_charge_status("PENDING"),
                            }
                        })
                    })
            }
            FundingProduct::Invoice => {
                let raw = self
                    .get("find_invoice", "/v2/invoices", &[("external_id", reference_id)])
                    .await?;
                let invoices: Vec<InvoiceResponse> = decode("find_invoice", &raw)?;
                invoices
                    .into_iter()
                    .find(|i| i.external_id.as_deref() == Some(reference_id))
                    .map(|invoice| self.invoice_created(invoice))
            }
        };

        tracing::info!(
            reference_id,
            found = found.is_some(),
            ?product,
            "Looked up funding by reference"
        );
        Ok(found)
    }

    async fn create_disbursement(
        &self,
        request: &DisbursementRequest,
    ) -> Result<DisbursementCreated> {
        let body = DisbursementBody {
            reference_id: &request.reference_id,
            channel_code: &self.config.channel_code,
            account_number: &request.account_number,
            account_holder_name: &request.account_holder_name,
            amount: request.amount,
            currency: &request.currency,
            description: &request.description,
        };

        let raw = self
            .post(
                "create_disbursement",
                "/disbursements",
                &body,
                self.config.disbursement_timeout,
                DISBURSEMENT_OK,
                Some(&request.reference_id),
            )
            .await?;
        let disbursement: DisbursementResponse = decode("create_disbursement", &raw)?;

        tracing::info!(
            disbursement_id = %disbursement.id,
            status = %disbursement.status,
            "Disbursement created"
        );

        Ok(DisbursementCreated {
            id: disbursement.id,
            status: self.track(normalize_disbursement_status(&disbursement.status)),
        })
    }

    fn name(&self) -> &str {
        "Xendit"
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct ChargeBody<'a> {
    reference_id: &'a str,
    currency: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    checkout_method: &'static str,
    channel_code: &'a str,
    channel_properties: ChannelProperties<'a>,
    metadata: ChargeMetadata<'a>,
}

#[derive(Serialize)]
struct ChannelProperties<'a> {
    mobile_number: &'a str,
    success_redirect_url: &'a str,
    failure_redirect_url: &'a str,
}

#[derive(Serialize)]
struct ChargeMetadata<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
    #[serde(default)]
    reference_id: Option<String>,
    status: String,
    #[serde(default)]
    actions: Option<ChargeActions>,
}

#[derive(Deserialize)]
struct ChargeList {
    #[serde(default)]
    data: Vec<ChargeResponse>,
}

#[derive(Deserialize)]
struct ChargeActions {
    mobile_deeplink_checkout_url: Option<String>,
    mobile_web_checkout_url: Option<String>,
    desktop_web_checkout_url: Option<String>,
}

impl ChargeActions {
    /// Deeplink first, then mobile web, then desktop
    fn best_url(self) -> Option<String> {
        [
            self.mobile_deeplink_checkout_url,
            self.mobile_web_checkout_url,
            self.desktop_web_checkout_url,
        ]
        .into_iter()
        .flatten()
        .find(|url| !url.is_empty())
    }
}

#[derive(Deserialize)]
struct ChargeStatusResponse {
    status: String,
}

#[derive(Serialize)]
struct InvoiceBody<'a> {
    external_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: &'a str,
    description: &'a str,
    payer_email: &'a str,
    success_redirect_url: &'a str,
    failure_redirect_url: &'a str,
}

#[derive(Deserialize)]
struct InvoiceResponse {
    id: String,
    #[serde(default)]
    external_id: Option<String>,
    status: String,
    invoice_url: String,
}

#[derive(Serialize)]
struct DisbursementBody<'a> {
    reference_id: &'a str,
    channel_code: &'a str,
    account_number: &'a str,
    account_holder_name: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct DisbursementResponse {
    id: String,
    status: String,
}
