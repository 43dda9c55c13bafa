//! Mock Payment Gateway
//!
//! For testing and local development. Answers every call in-process, records
//! what it was asked to do, and can be told to fail or to be slow. Funding is
//! remembered by reference id and disbursements are deduplicated on it, like
//! the real gateway's idempotency key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    normalize_charge_status, normalize_disbursement_status, ChargeRequest, DisbursementCreated,
    DisbursementRequest, FundingCreated, InvoiceRequest, Normalized, PaymentGateway,
};
use crate::config::FundingProduct;
use crate::error::{PaymentError, Result};
use crate::model::{FundingRef, PaymentStatus};

/// In-process gateway with call counters
pub struct MockGateway {
    charge_status: String,
    disbursement_status: String,
    latency: Duration,
    fail_funding: AtomicBool,
    fail_disbursements: AtomicBool,
    next_id: AtomicUsize,
    charge_calls: AtomicUsize,
    invoice_calls: AtomicUsize,
    status_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    disbursement_calls: AtomicUsize,
    remote_statuses: Mutex<HashMap<String, String>>,
    funded: Mutex<HashMap<String, FundingCreated>>,
    disbursements: Mutex<Vec<DisbursementRequest>>,
    disbursed: Mutex<HashMap<String, DisbursementCreated>>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            charge_status: "PENDING".into(),
            disbursement_status: "ACCEPTED".into(),
            latency: Duration::ZERO,
            fail_funding: AtomicBool::new(false),
            fail_disbursements: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            charge_calls: AtomicUsize::new(0),
            invoice_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
            disbursement_calls: AtomicUsize::new(0),
            remote_statuses: Mutex::new(HashMap::new()),
            funded: Mutex::new(HashMap::new()),
            disbursements: Mutex::new(Vec::new()),
            disbursed: Mutex::new(HashMap::new()),
        }
    }

    /// Raw status returned when a charge or invoice is created
    pub fn with_charge_status(mut self, raw: impl Into<String>) -> Self {
        self.charge_status = raw.into();
        self
    }

    /// Raw status returned when a disbursement is created
    pub fn with_disbursement_status(mut self, raw: impl Into<String>) -> Self {
        self.disbursement_status = raw.into();
        self
    }

    /// Delay applied to every call (to make concurrent calls overlap)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_funding(&self, fail: bool) {
        self.fail_funding.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disbursements(&self, fail: bool) {
        self.fail_disbursements.store(fail, Ordering::SeqCst);
    }

    /// Set what `get_charge_status` reports for a charge
    pub async fn set_remote_status(&self, charge_id: &str, raw: impl Into<String>) {
        self.remote_statuses
            .lock()
            .await
            .insert(charge_id.to_string(), raw.into());
    }

    pub fn charge_calls(&self) -> usize {
        self.charge_calls.load(Ordering::SeqCst)
    }

    pub fn invoice_calls(&self) -> usize {
        self.invoice_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn disbursement_calls(&self) -> usize {
        self.disbursement_calls.load(Ordering::SeqCst)
    }

    /// Every distinct disbursement request received, in order
    pub async fn disbursement_requests(&self) -> Vec<DisbursementRequest> {
        self.disbursements.lock().await.clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}_{:06}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn unavailable(operation: &'static str) -> PaymentError {
        PaymentError::Upstream {
            operation,
            attempts: 3,
            status: Some(503),
            body: "mock gateway unavailable".into(),
        }
    }

    async fn fund(&self, reference_id: &str, funding: FundingRef) -> Result<FundingCreated> {
        self.remote_statuses
            .lock()
            .await
            .insert(funding.id().to_string(), self.charge_status.clone());

        let created = FundingCreated {
            checkout_url: format!("https://checkout.mock/{}", funding.id()),
            funding,
            status: normalize_charge_status(&self.charge_status),
        };
        self.funded
            .lock()
            .await
            .insert(reference_id.to_string(), created.clone());
        Ok(created)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<FundingCreated> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_funding.load(Ordering::SeqCst) {
            return Err(Self::unavailable("create_charge"));
        }
        let funding = FundingRef::Charge(self.next_id("ewc"));
        self.fund(&request.reference_id, funding).await
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<FundingCreated> {
        self.invoice_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_funding.load(Ordering::SeqCst) {
            return Err(Self::unavailable("create_invoice"));
        }
        let funding = FundingRef::Invoice(self.next_id("inv"));
        self.fund(&request.reference_id, funding).await
    }

    async fn get_charge_status(&self, charge_id: &str) -> Result<Normalized<PaymentStatus>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let statuses = self.remote_statuses.lock().await;
        let raw = statuses
            .get(charge_id)
            .ok_or_else(|| PaymentError::Upstream {
                operation: "get_charge_status",
                attempts: 1,
                status: Some(404),
                body: format!("charge {charge_id} not found"),
            })?;
        Ok(normalize_charge_status(raw))
    }

    async fn find_funding(
        &self,
        product: FundingProduct,
        reference_id: &str,
    ) -> Result<Option<FundingCreated>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_funding.load(Ordering::SeqCst) {
            return Err(Self::unavailable("find_funding"));
        }

        let Some(mut found) = self.funded.lock().await.get(reference_id).cloned() else {
            return Ok(None);
        };
        let kind_matches = matches!(
            (product, &found.funding),
            (FundingProduct::EwalletCharge, FundingRef::Charge(_))
                | (FundingProduct::Invoice, FundingRef::Invoice(_))
        );
        if !kind_matches {
            return Ok(None);
        }
        if let Some(raw) = self.remote_statuses.lock().await.get(found.funding.id()) {
            found.status = normalize_charge_status(raw);
        }
        Ok(Some(found))
    }

    async fn create_disbursement(
        &self,
        request: &DisbursementRequest,
    ) -> Result<DisbursementCreated> {
        self.disbursement_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_disbursements.load(Ordering::SeqCst) {
            return Err(Self::unavailable("create_disbursement"));
        }

        let mut disbursed = self.disbursed.lock().await;
        if let Some(existing) = disbursed.get(&request.reference_id) {
            return Ok(existing.clone());
        }
        let created = DisbursementCreated {
            id: self.next_id("disb"),
            status: normalize_disbursement_status(&self.disbursement_status),
        };
        disbursed.insert(request.reference_id.clone(), created.clone());
        self.disbursements.lock().await.push(request.clone());
        Ok(created)
    }

    fn name(&self) -> &str {
        "MockGateway"
    }
}
