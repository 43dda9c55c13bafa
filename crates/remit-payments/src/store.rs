//! Payment Record Store
//!
//! Persistence contract for [`Payment`] plus an in-memory implementation.
//! Status changes go through [`PaymentStore::update_status`], which checks the
//! transition's pre-state and writes in one atomic step.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};
use crate::model::{DisbursementStatus, Payment, PaymentId, PaymentStatus, Transition, UserId};

/// How a single payment is addressed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selector {
    Id(PaymentId),
    ReferenceId(String),
    /// Gateway charge or invoice id
    FundingId(String),
    DisbursementId(String),
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Id(id) => write!(f, "id={id}"),
            Selector::ReferenceId(r) => write!(f, "reference_id={r}"),
            Selector::FundingId(c) => write!(f, "charge_or_invoice_id={c}"),
            Selector::DisbursementId(d) => write!(f, "disbursement_id={d}"),
        }
    }
}

/// Inclusive `created_at` window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(PaymentError::Validation(
                "start_date must not be after end_date".into(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Parse an RFC 3339 pair, e.g. from query parameters
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |field: &str, value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| PaymentError::Validation(format!("invalid {field} format: {e}")))
        };
        Self::new(parse("start_date", start)?, parse("end_date", end)?)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Filter for [`PaymentStore::query`]
#[derive(Clone, Debug, Default)]
pub struct PaymentQuery {
    pub status: Option<PaymentStatus>,
    pub created: Option<DateRange>,
    /// Payments where this user is payer or payee
    pub party: Option<UserId>,
    /// Payments whose payout is in this state
    pub disbursement: Option<DisbursementStatus>,
}

impl PaymentQuery {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.status.is_none_or(|s| payment.status == s)
            && self.created.is_none_or(|r| r.contains(payment.created_at))
            && self
                .party
                .is_none_or(|u| payment.payer_id == u || payment.payee_id == u)
            && self.disbursement.is_none_or(|s| {
                payment
                    .disbursement
                    .as_ref()
                    .is_some_and(|d| d.status == s)
            })
    }
}

/// Payment storage trait
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new payment; id and reference id must be unused
    async fn insert(&self, payment: &Payment) -> Result<()>;

    /// Look up one payment
    async fn get(&self, selector: &Selector) -> Result<Option<Payment>>;

    /// Apply `transition` to the selected payment if its current state allows
    ///
    /// Returns the updated record, [`PaymentError::NotFound`] when nothing
    /// matches, or [`PaymentError::Conflict`] when the pre-state differs.
    async fn update_status(&self, selector: &Selector, transition: &Transition) -> Result<Payment>;

    /// Matching payments, newest first
    async fn query(&self, query: &PaymentQuery) -> Result<Vec<Payment>>;

    async fn find_by_id(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.get(&Selector::Id(id)).await
    }

    async fn find_by_reference_id(&self, reference_id: &str) -> Result<Option<Payment>> {
        self.get(&Selector::ReferenceId(reference_id.to_string())).await
    }

    async fn find_by_funding_id(&self, funding_id: &str) -> Result<Option<Payment>> {
        self.get(&Selector::FundingId(funding_id.to_string())).await
    }

    async fn find_by_disbursement_id(&self, disbursement_id: &str) -> Result<Option<Payment>> {
        self.get(&Selector::DisbursementId(disbursement_id.to_string()))
            .await
    }
}

#[derive(Default)]
struct Tables {
    payments: HashMap<PaymentId, Payment>,
    by_reference: HashMap<String, PaymentId>,
    by_funding: HashMap<String, PaymentId>,
    by_disbursement: HashMap<String, PaymentId>,
}

impl Tables {
    fn resolve(&self, selector: &Selector) -> Option<PaymentId> {
        match selector {
            Selector::Id(id) => self.payments.contains_key(id).then_some(*id),
            Selector::ReferenceId(r) => self.by_reference.get(r).copied(),
            Selector::FundingId(f) => self.by_funding.get(f).copied(),
            Selector::DisbursementId(d) => self.by_disbursement.get(d).copied(),
        }
    }
}

/// In-memory payment store (for development and tests)
///
/// One lock covers the records and every secondary index, so lookups and
/// conditional updates are atomic with respect to each other.
#[derive(Default)]
pub struct MemoryPaymentStore {
    tables: RwLock<Tables>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.payments.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables.payments.contains_key(&payment.id) {
            return Err(PaymentError::Storage(format!(
                "duplicate payment id {}",
                payment.id
            )));
        }
        let reference = payment.reference_id.as_str().to_string();
        if tables.by_reference.contains_key(&reference) {
            return Err(PaymentError::Storage(format!(
                "duplicate reference id {reference}"
            )));
        }
        let funding = payment.funding.id().to_string();
        if tables.by_funding.contains_key(&funding) {
            return Err(PaymentError::Storage(format!(
                "duplicate charge/invoice id {funding}"
            )));
        }

        tables.by_reference.insert(reference, payment.id);
        tables.by_funding.insert(funding, payment.id);
        if let Some(disbursement_id) = payment.disbursement_id() {
            tables
                .by_disbursement
                .insert(disbursement_id.to_string(), payment.id);
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get(&self, selector: &Selector) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .resolve(selector)
            .and_then(|id| tables.payments.get(&id).cloned()))
    }

    async fn update_status(&self, selector: &Selector, transition: &Transition) -> Result<Payment> {
        let mut tables = self.tables.write().await;

        let id = tables
            .resolve(selector)
            .ok_or_else(|| PaymentError::not_found("Payment", selector.to_string()))?;
        let payment = tables
            .payments
            .get_mut(&id)
            .ok_or_else(|| PaymentError::Storage(format!("index points at missing payment {id}")))?;

        // Apply on a copy so a rejected transition leaves the record untouched
        let mut updated = payment.clone();
        updated.apply(transition)?;
        *payment = updated.clone();

        if let Some(disbursement_id) = updated.disbursement_id() {
            tables
                .by_disbursement
                .insert(disbursement_id.to_string(), id);
        }
        Ok(updated)
    }

    async fn query(&self, query: &PaymentQuery) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}
