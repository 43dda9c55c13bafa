//! Payment Orchestrator
//!
//! Drives a payment through funding and payout:
//!
//! ```text
//! PENDING ──► SUCCEEDED ──► DISBURSEMENT_PENDING ──► DISBURSEMENT_SUCCEEDED
//!    │
//!    └──────► EXPIRED
//! ```
//!
//! Transitions come from direct calls (`confirm_payment`, `refresh_payment`,
//! `create_disbursement`) and from gateway webhooks. Every transition is a
//! conditional write in the store, so concurrent deliveries of the same event
//! cannot both move a record or both start a payout.
//!
//! Gateway calls that move money are bracketed so a partial failure can be
//! finished later by [`PaymentOrchestrator::reconcile_in_flight`]: funding
//! through the intent journal, payouts through the `INITIATING` claim, which
//! is re-sent under the same idempotency key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{FundingProduct, OrchestratorConfig};
use crate::error::{PaymentError, Result};
use crate::gateway::{
    normalize_disbursement_status, CallbackUrls, ChargeRequest, DisbursementCreated,
    DisbursementRequest, FundingCreated, InvoiceRequest, PaymentGateway,
};
use crate::journal::{IntentEntry, IntentJournal, IntentState};
use crate::model::{
    DisbursementStatus, FundingRef, Payment, PaymentId, PaymentStatus, ReferenceId,
    Transition, User, UserId, WalletNumber,
};
use crate::redact::{mask_email, mask_number};
use crate::store::{DateRange, PaymentQuery, PaymentStore, Selector};
use crate::users::UserDirectory;
use crate::webhook::{funding_event_outcome, WebhookEvent};

/// Caller input for a new transfer
#[derive(Clone, Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub payer_id: String,
    pub payee_id: String,
    pub amount: Decimal,
    pub title: String,
    pub description: String,
}

/// What a webhook delivery did
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Record moved to a new state
    Applied { payment_id: PaymentId, state: String },
    /// Record already past this event (redelivery)
    Unchanged { payment_id: PaymentId, state: String },
    /// Event carries nothing to act on
    Ignored { event_type: String },
}

/// Result of one reconciliation pass
#[derive(Clone, Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Payments rebuilt from accepted intents
    pub recovered: Vec<PaymentId>,
    /// Open intents whose payment was already stored
    pub already_stored: usize,
    /// Intents the gateway has no record of, by reference id
    pub failed: Vec<String>,
    /// Payout claims left `INITIATING` that were finished
    pub resumed_disbursements: Vec<PaymentId>,
    /// Intents and claims still without a known outcome, by reference id
    pub unresolved: Vec<String>,
}

/// Payment orchestrator
pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn PaymentStore>,
    users: Arc<dyn UserDirectory>,
    journal: Arc<dyn IntentJournal>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn PaymentStore>,
        users: Arc<dyn UserDirectory>,
        journal: Arc<dyn IntentJournal>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            users,
            journal,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Validate the parties, fund the payment at the gateway and store it
    pub async fn create_payment(&self, request: CreatePaymentRequest) -> Result<Payment> {
        let payer_id = UserId::parse(&request.payer_id)?;
        let payee_id = UserId::parse(&request.payee_id)?;
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::Validation("amount must be greater than 0".into()));
        }
        let title = non_empty("title", &request.title)?;
        let description = non_empty("description", &request.description)?;

        let payer = self.user(payer_id).await?;
        let payee = self.user(payee_id).await?;
        WalletNumber::parse(&payee.wallet_number)
            .map_err(|e| PaymentError::Validation(format!("payee {}", e.user_message())))?;

        let funding_call = self.funding_call(&payer)?;

        let now = Utc::now();
        let intent = IntentEntry {
            reference_id: ReferenceId::generate(),
            payment_id: PaymentId::new(),
            payer_id,
            payee_id,
            amount: request.amount,
            title,
            description,
            state: IntentState::Recorded,
            recorded_at: now,
            updated_at: now,
        };
        self.journal.append(&intent).await?;

        tracing::info!(
            payment_id = %intent.payment_id,
            reference_id = %intent.reference_id,
            payer_id = %payer_id,
            payee_id = %payee_id,
            amount = %intent.amount,
            gateway = self.gateway.name(),
            "Creating payment"
        );

        let created = match self.fund(&funding_call, &intent).await {
            Ok(created) => created,
            Err(e) => {
                self.journal_quietly(&intent.advance(IntentState::Failed {
                    reason: e.to_string(),
                }))
                .await;
                tracing::warn!(
                    reference_id = %intent.reference_id,
                    error = %e,
                    "Gateway rejected payment creation"
                );
                return Err(e);
            }
        };

        let accepted = intent.advance(IntentState::Accepted {
            funding: created.funding.clone(),
            checkout_url: created.checkout_url.clone(),
            status: created.status.value,
        });
        self.journal_quietly(&accepted).await;

        let fields = accepted
            .to_new_payment()
            .ok_or_else(|| PaymentError::Journal("accepted intent has no payment fields".into()))?;
        let payment = Payment::new(fields);

        let payment = match self.insert_once(&payment).await {
            Ok(Inserted::New) => payment,
            // Reconciliation stored it first
            Ok(Inserted::Existing(stored)) => stored,
            Err(e) => {
                tracing::error!(
                    payment_id = %payment.id,
                    reference_id = %payment.reference_id,
                    funding_id = payment.funding.id(),
                    error = %e,
                    "Gateway accepted payment but it was not stored; left for reconciliation"
                );
                return Err(e);
            }
        };
        self.journal_quietly(&accepted.advance(IntentState::Persisted))
            .await;

        tracing::info!(
            payment_id = %payment.id,
            funding_id = payment.funding.id(),
            status = %payment.status,
            status_coerced = created.status.coerced,
            "Payment created"
        );
        Ok(payment)
    }

    fn funding_call(&self, payer: &User) -> Result<FundingCall> {
        match self.config.funding {
            FundingProduct::EwalletCharge => {
                let wallet = WalletNumber::parse(&payer.wallet_number)
                    .map_err(|e| PaymentError::Validation(format!("payer {}", e.user_message())))?;
                Ok(FundingCall::Charge {
                    mobile_number: wallet.to_international(&self.config.dial_code),
                })
            }
            FundingProduct::Invoice => {
                let email = payer.email.trim();
                let usable = email
                    .split_once('@')
                    .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
                if !usable {
                    return Err(PaymentError::Validation(
                        "payer has no usable contact email".into(),
                    ));
                }
                Ok(FundingCall::Invoice {
                    payer_email: email.to_string(),
                })
            }
        }
    }

    async fn fund(&self, call: &FundingCall, intent: &IntentEntry) -> Result<FundingCreated> {
        let callbacks = CallbackUrls {
            success: self.config.success_url(),
            failure: self.config.failure_url(),
        };
        match call {
            FundingCall::Charge { mobile_number } => {
                tracing::debug!(
                    reference_id = %intent.reference_id,
                    mobile_number = %mask_number(mobile_number),
                    "Requesting e-wallet charge"
                );
                self.gateway
                    .create_charge(&ChargeRequest {
                        reference_id: intent.reference_id.to_string(),
                        amount: intent.amount,
                        currency: self.config.currency.clone(),
                        mobile_number: mobile_number.clone(),
                        title: intent.title.clone(),
                        description: intent.description.clone(),
                        callbacks,
                    })
                    .await
            }
            FundingCall::Invoice { payer_email } => {
                tracing::debug!(
                    reference_id = %intent.reference_id,
                    payer_email = %mask_email(payer_email),
                    "Requesting invoice"
                );
                self.gateway
                    .create_invoice(&InvoiceRequest {
                        reference_id: intent.reference_id.to_string(),
                        amount: intent.amount,
                        currency: self.config.currency.clone(),
                        payer_email: payer_email.clone(),
                        description: intent.description.clone(),
                        callbacks,
                    })
                    .await
            }
        }
    }

    // =========================================================================
    // Direct transitions
    // =========================================================================

    /// PENDING → SUCCEEDED; a second call is a conflict
    pub async fn confirm_payment(&self, payment_id: &str) -> Result<Payment> {
        let id = PaymentId::parse(payment_id)?;
        let payment = self
            .stored(
                "update_status",
                self.store.update_status(&Selector::Id(id), &Transition::Confirm),
            )
            .await?;
        tracing::info!(payment_id = %id, "Payment confirmed");
        Ok(payment)
    }

    /// Pay out a SUCCEEDED payment to the payee's wallet
    pub async fn create_disbursement(&self, payment_id: &str) -> Result<Payment> {
        let id = PaymentId::parse(payment_id)?;
        self.disburse(&Selector::Id(id)).await
    }

    /// Poll the gateway for a charge-funded PENDING payment
    pub async fn refresh_payment(&self, payment_id: &str) -> Result<Payment> {
        let id = PaymentId::parse(payment_id)?;
        let payment = self.payment(&Selector::Id(id)).await?;

        let FundingRef::Charge(charge_id) = &payment.funding else {
            return Err(PaymentError::Validation(
                "invoice-funded payments are updated by webhook only".into(),
            ));
        };
        if payment.status != PaymentStatus::Pending {
            return Ok(payment);
        }

        let remote = self.gateway.get_charge_status(charge_id).await?;
        tracing::info!(
            payment_id = %id,
            charge_id = %charge_id,
            remote_status = %remote.raw,
            status_coerced = remote.coerced,
            "Polled charge status"
        );

        match remote.value {
            PaymentStatus::Pending => Ok(payment),
            outcome => {
                self.settle_funding(&Selector::Id(id), outcome).await?;
                self.payment(&Selector::Id(id)).await
            }
        }
    }

    // =========================================================================
    // Webhooks
    // =========================================================================

    /// Classify a gateway callback and apply it
    ///
    /// Safe under redelivery: the conditional writes let exactly one delivery
    /// move the record, the rest report `Unchanged`. Unknown correlation ids
    /// are `NotFound`.
    pub async fn handle_webhook(&self, payload: &Value) -> Result<WebhookOutcome> {
        let event = WebhookEvent::parse(payload)?;
        tracing::info!(event_type = event.event_type(), "Processing gateway webhook");

        match event {
            WebhookEvent::FundingUpdated {
                event_type,
                funding_id,
                status,
            } => {
                let selector = Selector::FundingId(funding_id);
                // Existence check first so unknown ids fail even for no-op events
                let payment = self.payment(&selector).await?;

                match funding_event_outcome(&status) {
                    Some(outcome) => self.settle_funding(&selector, outcome).await,
                    None => {
                        tracing::debug!(
                            payment_id = %payment.id,
                            event_type = %event_type,
                            status = %status,
                            "Funding event has no transition"
                        );
                        Ok(WebhookOutcome::Ignored { event_type })
                    }
                }
            }

            WebhookEvent::DisbursementUpdated {
                disbursement_id,
                status,
                ..
            } => self.settle_disbursement(disbursement_id, &status).await,

            WebhookEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "Ignoring webhook event");
                Ok(WebhookOutcome::Ignored { event_type })
            }
        }
    }

    /// Apply a terminal funding outcome and start the payout on success
    async fn settle_funding(
        &self,
        selector: &Selector,
        outcome: PaymentStatus,
    ) -> Result<WebhookOutcome> {
        let transition = match outcome {
            PaymentStatus::Succeeded => Transition::Confirm,
            PaymentStatus::Expired => Transition::Expire,
            PaymentStatus::Pending => {
                return Err(PaymentError::Validation(
                    "PENDING is not a funding outcome".into(),
                ));
            }
        };

        let moved = match self
            .stored("update_status", self.store.update_status(selector, &transition))
            .await
        {
            Ok(payment) => {
                tracing::info!(
                    payment_id = %payment.id,
                    status = %payment.status,
                    "Funding settled"
                );
                true
            }
            Err(PaymentError::Conflict { .. }) => false,
            Err(e) => return Err(e),
        };

        let current = self.payment(selector).await?;
        if outcome == PaymentStatus::Expired || current.status != PaymentStatus::Succeeded {
            if !moved {
                tracing::warn!(
                    payment_id = %current.id,
                    state = %current.state_label(),
                    outcome = %outcome,
                    "Funding event arrived after the payment left PENDING"
                );
            }
            return Ok(settled(moved, &current));
        }

        // A redelivered success retries a payout that never started, or one
        // whose claim has been in flight longer than the grace period
        if let Some(d) = &current.disbursement {
            let stranded = d.status == DisbursementStatus::Initiating
                && older_than(current.updated_at, self.config.reconcile_grace);
            if !stranded {
                return Ok(settled(moved, &current));
            }
            let resumed = self.resume_disbursement(&current).await?;
            return Ok(settled(true, &resumed));
        }
        match self.disburse(selector).await {
            Ok(payment) => Ok(WebhookOutcome::Applied {
                payment_id: payment.id,
                state: payment.state_label(),
            }),
            // Another delivery claimed the payout first
            Err(PaymentError::Conflict { .. }) => {
                let current = self.payment(selector).await?;
                Ok(settled(moved, &current))
            }
            Err(e) => Err(e),
        }
    }

    async fn settle_disbursement(
        &self,
        disbursement_id: String,
        raw_status: &str,
    ) -> Result<WebhookOutcome> {
        let selector = Selector::DisbursementId(disbursement_id);
        let payment = self.payment(&selector).await?;
        let status = normalize_disbursement_status(raw_status);

        if status.value != DisbursementStatus::Succeeded {
            return Ok(WebhookOutcome::Unchanged {
                payment_id: payment.id,
                state: payment.state_label(),
            });
        }

        match self
            .stored(
                "update_status",
                self.store
                    .update_status(&selector, &Transition::CompleteDisbursement),
            )
            .await
        {
            Ok(payment) => {
                tracing::info!(
                    payment_id = %payment.id,
                    disbursement_id = payment.disbursement_id().unwrap_or_default(),
                    status_coerced = status.coerced,
                    "Disbursement completed"
                );
                Ok(WebhookOutcome::Applied {
                    payment_id: payment.id,
                    state: payment.state_label(),
                })
            }
            Err(PaymentError::Conflict { .. }) => {
                let current = self.payment(&selector).await?;
                Ok(WebhookOutcome::Unchanged {
                    payment_id: current.id,
                    state: current.state_label(),
                })
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Disbursement
    // =========================================================================

    /// Claim, call the gateway, record; the claim is released if the call fails
    async fn disburse(&self, selector: &Selector) -> Result<Payment> {
        let payment = self.payment(selector).await?;
        let claim = Transition::ClaimDisbursement {
            reference_id: payment.reference_id.disbursement(),
        };

        // Reject early so a bad pre-state never reaches the user lookup or gateway
        payment.clone().apply(&claim)?;
        let request = self.payout_request(&payment).await?;

        let claimed = self
            .stored("update_status", self.store.update_status(selector, &claim))
            .await?;
        let selector = Selector::Id(claimed.id);

        tracing::info!(
            payment_id = %claimed.id,
            reference_id = %request.reference_id,
            account_number = %mask_number(&request.account_number),
            amount = %request.amount,
            "Creating disbursement"
        );

        let created = match self.gateway.create_disbursement(&request).await {
            Ok(created) => created,
            Err(e) => {
                if let Err(release) = self
                    .stored(
                        "update_status",
                        self.store
                            .update_status(&selector, &Transition::ReleaseDisbursement),
                    )
                    .await
                {
                    tracing::error!(
                        payment_id = %claimed.id,
                        error = %release,
                        "Failed to release disbursement claim"
                    );
                }
                tracing::warn!(payment_id = %claimed.id, error = %e, "Disbursement failed");
                return Err(e);
            }
        };

        self.record_disbursement(claimed.id, &created)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    payment_id = %claimed.id,
                    disbursement_id = %created.id,
                    error = %e,
                    "Gateway accepted disbursement but it was not recorded"
                );
            })
    }

    /// Re-send the payout for a claim stuck `INITIATING`
    ///
    /// The request carries the same reference id as the first attempt, so the
    /// gateway answers with the disbursement it already created, if any. The
    /// claim is kept on failure.
    async fn resume_disbursement(&self, payment: &Payment) -> Result<Payment> {
        let request = self.payout_request(payment).await?;
        tracing::warn!(
            payment_id = %payment.id,
            reference_id = %request.reference_id,
            claimed_at = %payment.updated_at,
            "Resuming disbursement left in flight"
        );
        let created = self.gateway.create_disbursement(&request).await?;
        self.record_disbursement(payment.id, &created).await
    }

    async fn payout_request(&self, payment: &Payment) -> Result<DisbursementRequest> {
        let payee = self.user(payment.payee_id).await?;
        let wallet = WalletNumber::parse(&payee.wallet_number)
            .map_err(|e| PaymentError::Validation(format!("payee {}", e.user_message())))?;

        Ok(DisbursementRequest {
            reference_id: payment.reference_id.disbursement(),
            account_number: wallet.as_str().to_string(),
            account_holder_name: payee.full_name,
            amount: payment.amount,
            currency: self.config.currency.clone(),
            description: payment.title.clone(),
        })
    }

    /// INITIATING → gateway id recorded; a record already made wins
    async fn record_disbursement(
        &self,
        id: PaymentId,
        created: &DisbursementCreated,
    ) -> Result<Payment> {
        let selector = Selector::Id(id);
        let transition = Transition::RecordDisbursement {
            id: created.id.clone(),
            status: created.status.value,
        };

        match self
            .stored("update_status", self.store.update_status(&selector, &transition))
            .await
        {
            Ok(recorded) => {
                tracing::info!(
                    payment_id = %recorded.id,
                    disbursement_id = %created.id,
                    status = created.status.value.as_str(),
                    status_coerced = created.status.coerced,
                    "Disbursement created"
                );
                Ok(recorded)
            }
            Err(PaymentError::Conflict { .. }) => {
                let current = self.payment(&selector).await?;
                if current.disbursement_id() == Some(created.id.as_str()) {
                    return Ok(current);
                }
                Err(PaymentError::Conflict {
                    payment_id: current.id.to_string(),
                    current: current.state_label(),
                    expected: "DISBURSEMENT_INITIATING".into(),
                })
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_payment(&self, payment_id: &str) -> Result<Payment> {
        let id = PaymentId::parse(payment_id)?;
        self.payment(&Selector::Id(id)).await
    }

    /// Payments newest first; no filter means every status
    pub async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        created: Option<DateRange>,
    ) -> Result<Vec<Payment>> {
        let query = PaymentQuery {
            status,
            created,
            ..PaymentQuery::default()
        };
        self.stored("query", self.store.query(&query)).await
    }

    /// Payments where the user is payer or payee
    pub async fn list_payments_for_user(
        &self,
        user_id: &str,
        status: Option<PaymentStatus>,
        created: Option<DateRange>,
    ) -> Result<Vec<Payment>> {
        let id = UserId::parse(user_id)?;
        self.user(id).await?;
        let query = PaymentQuery {
            status,
            created,
            party: Some(id),
            ..PaymentQuery::default()
        };
        self.stored("query", self.store.query(&query)).await
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Finish money movements interrupted by a partial failure
    ///
    /// Open journal intents are stored if the gateway accepted them. Intents
    /// whose outcome was never recorded are looked up at the gateway once
    /// they are older than the grace period. Payout claims left `INITIATING`
    /// past the grace period are re-sent and recorded. An item that cannot be
    /// settled is reported as unresolved and retried on the next pass.
    pub async fn reconcile_in_flight(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for entry in self.journal.open_entries().await? {
            let reference_id = entry.reference_id.to_string();
            if let Err(e) = self.reconcile_intent(entry, &mut report).await {
                tracing::warn!(reference_id = %reference_id, error = %e, "Intent not reconciled");
                report.unresolved.push(reference_id);
            }
        }

        let claims = PaymentQuery {
            disbursement: Some(DisbursementStatus::Initiating),
            ..PaymentQuery::default()
        };
        for payment in self.stored("query", self.store.query(&claims)).await? {
            if !older_than(payment.updated_at, self.config.reconcile_grace) {
                continue;
            }
            match self.resume_disbursement(&payment).await {
                Ok(resumed) => report.resumed_disbursements.push(resumed.id),
                Err(e) => {
                    tracing::warn!(
                        payment_id = %payment.id,
                        error = %e,
                        "Disbursement claim not resumed"
                    );
                    report.unresolved.push(payment.reference_id.disbursement());
                }
            }
        }

        self.journal.compact().await?;
        Ok(report)
    }

    async fn reconcile_intent(
        &self,
        mut entry: IntentEntry,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let existing = self
            .stored(
                "get",
                self.store.find_by_reference_id(entry.reference_id.as_str()),
            )
            .await?;
        if existing.is_some() {
            self.journal
                .append(&entry.advance(IntentState::Persisted))
                .await?;
            report.already_stored += 1;
            return Ok(());
        }

        if entry.state == IntentState::Recorded {
            if !older_than(entry.recorded_at, self.config.reconcile_grace) {
                // The creating call may still be waiting on the gateway
                report.unresolved.push(entry.reference_id.to_string());
                return Ok(());
            }

            let found = self
                .gateway
                .find_funding(self.config.funding, entry.reference_id.as_str())
                .await?;
            let Some(created) = found else {
                tracing::warn!(
                    reference_id = %entry.reference_id,
                    recorded_at = %entry.recorded_at,
                    "Gateway has no record of payment intent"
                );
                self.journal
                    .append(&entry.advance(IntentState::Failed {
                        reason: "gateway has no record of this reference".into(),
                    }))
                    .await?;
                report.failed.push(entry.reference_id.to_string());
                return Ok(());
            };

            entry = entry.advance(IntentState::Accepted {
                funding: created.funding,
                checkout_url: created.checkout_url,
                status: created.status.value,
            });
            self.journal.append(&entry).await?;
        }

        let fields = entry
            .to_new_payment()
            .ok_or_else(|| PaymentError::Journal("open intent has no payment fields".into()))?;
        let mut payment = Payment::new(fields);
        payment.created_at = entry.recorded_at;

        let inserted = self.insert_once(&payment).await?;
        self.journal
            .append(&entry.advance(IntentState::Persisted))
            .await?;

        match inserted {
            Inserted::New => {
                tracing::info!(
                    payment_id = %payment.id,
                    reference_id = %payment.reference_id,
                    funding_id = payment.funding.id(),
                    "Recovered payment from intent journal"
                );
                report.recovered.push(payment.id);
            }
            Inserted::Existing(_) => report.already_stored += 1,
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn stored<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| {
                PaymentError::Storage(format!(
                    "{operation} timed out after {:?}",
                    self.config.store_timeout
                ))
            })?
    }

    /// Insert, treating the same payment already stored as success
    async fn insert_once(&self, payment: &Payment) -> Result<Inserted> {
        let Err(e) = self.stored("insert", self.store.insert(payment)).await else {
            return Ok(Inserted::New);
        };
        let existing = self
            .stored(
                "get",
                self.store.find_by_reference_id(payment.reference_id.as_str()),
            )
            .await?;
        match existing {
            Some(stored) if stored.id == payment.id => Ok(Inserted::Existing(stored)),
            _ => Err(e),
        }
    }

    async fn payment(&self, selector: &Selector) -> Result<Payment> {
        self.stored("get", self.store.get(selector))
            .await?
            .ok_or_else(|| PaymentError::not_found("Payment", selector.to_string()))
    }

    async fn user(&self, id: UserId) -> Result<User> {
        self.stored("get_user", self.users.get_user(id))
            .await?
            .ok_or_else(|| PaymentError::not_found("User", id.to_string()))
    }

    /// Journal write whose failure must not undo a completed gateway call
    async fn journal_quietly(&self, entry: &IntentEntry) {
        if let Err(e) = self.journal.append(entry).await {
            tracing::error!(
                reference_id = %entry.reference_id,
                error = %e,
                "Intent journal write failed"
            );
        }
    }
}

enum FundingCall {
    Charge { mobile_number: String },
    Invoice { payer_email: String },
}

enum Inserted {
    New,
    Existing(Payment),
}

fn older_than(at: DateTime<Utc>, grace: Duration) -> bool {
    let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
    Utc::now().signed_duration_since(at) >= grace
}

fn settled(moved: bool, payment: &Payment) -> WebhookOutcome {
    let payment_id = payment.id;
    let state = payment.state_label();
    if moved {
        WebhookOutcome::Applied { payment_id, state }
    } else {
        WebhookOutcome::Unchanged { payment_id, state }
    }
}

fn non_empty(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PaymentError::Validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}
