//! End-to-end payment flows through the public orchestrator API, backed by
//! the mock gateway and the in-memory stores.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use remit_payments::gateway::{CallbackUrls, ChargeRequest};
use remit_payments::journal::{IntentEntry, IntentState};
use remit_payments::model::{ReferenceId, Transition};
use remit_payments::store::Selector;
use remit_payments::{
    CreatePaymentRequest, DateRange, DisbursementStatus, FundingProduct, FundingRef,
    IntentJournal, MemoryIntentJournal, MemoryPaymentStore, MemoryUserDirectory, MockGateway,
    OrchestratorConfig, Payment, PaymentError, PaymentGateway, PaymentId, PaymentOrchestrator,
    PaymentQuery, PaymentStatus, PaymentStore, Result, User, UserId, WebhookOutcome,
};

// ============================================================================
// Harness
// ============================================================================

struct Setup {
    orchestrator: Arc<PaymentOrchestrator>,
    gateway: Arc<MockGateway>,
    users: Arc<MemoryUserDirectory>,
    journal: Arc<MemoryIntentJournal>,
    payer: UserId,
    payee: UserId,
}

async fn setup_with(
    gateway: MockGateway,
    store: Arc<dyn PaymentStore>,
    funding: FundingProduct,
) -> Setup {
    let config = OrchestratorConfig {
        funding,
        ..OrchestratorConfig::default()
    };
    setup_with_config(gateway, store, config).await
}

async fn setup_with_config(
    gateway: MockGateway,
    store: Arc<dyn PaymentStore>,
    config: OrchestratorConfig,
) -> Setup {
    let gateway = Arc::new(gateway);
    let users = Arc::new(MemoryUserDirectory::new());
    let journal = Arc::new(MemoryIntentJournal::new());

    let payer = users
        .add(User::new("Juan Dela Cruz", "juan.delacruz@example.com", "09171112222"))
        .await;
    let payee = users
        .add(User::new("Maria Santos", "maria@example.com", "09123456789"))
        .await;

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateway.clone(),
        store,
        users.clone(),
        journal.clone(),
        config,
    ));

    Setup {
        orchestrator,
        gateway,
        users,
        journal,
        payer,
        payee,
    }
}

async fn setup() -> Setup {
    setup_with(
        MockGateway::new(),
        Arc::new(MemoryPaymentStore::new()),
        FundingProduct::EwalletCharge,
    )
    .await
}

fn request(s: &Setup) -> CreatePaymentRequest {
    CreatePaymentRequest {
        payer_id: s.payer.to_string(),
        payee_id: s.payee.to_string(),
        amount: dec!(500.0),
        title: "T".into(),
        description: "D".into(),
    }
}

fn paid_event(funding_id: &str) -> Value {
    json!({
        "event": "charge.paid",
        "data": { "id": funding_id, "status": "PAID" }
    })
}

fn disbursement_completed(disbursement_id: &str) -> Value {
    json!({
        "event": "ph_disbursement.completed",
        "data": { "id": disbursement_id, "status": "COMPLETED" }
    })
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_create_then_fetch_round_trip() {
    let s = setup().await;
    let created = s.orchestrator.create_payment(request(&s)).await.unwrap();

    let fetched = s
        .orchestrator
        .get_payment(&created.id.to_string())
        .await
        .unwrap();
    assert_eq!(fetched.amount, dec!(500.0));
    assert_eq!(fetched.title, "T");
    assert_eq!(fetched.description, "D");
    assert!(matches!(
        fetched.status,
        PaymentStatus::Pending | PaymentStatus::Succeeded
    ));
    assert_eq!(fetched.payer_id, s.payer);
    assert_eq!(fetched.payee_id, s.payee);
    assert!(matches!(fetched.funding, FundingRef::Charge(_)));
    assert!(fetched.disbursement.is_none());
    assert_eq!(s.gateway.charge_calls(), 1);
}

#[tokio::test]
async fn test_each_payment_gets_fresh_reference_id() {
    let s = setup().await;
    let a = s.orchestrator.create_payment(request(&s)).await.unwrap();
    let b = s.orchestrator.create_payment(request(&s)).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_ne!(a.reference_id, b.reference_id);
    assert_ne!(a.funding, b.funding);
    assert_eq!(s.orchestrator.list_payments(None, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_status_comes_from_normalized_gateway_response() {
    let s = setup_with(
        MockGateway::new().with_charge_status("SOMETHING_NEW"),
        Arc::new(MemoryPaymentStore::new()),
        FundingProduct::EwalletCharge,
    )
    .await;

    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_validation_failures_make_no_gateway_call() {
    let s = setup().await;
    let bad_wallet = s
        .users
        .add(User::new("Bad Wallet", "bad@example.com", "12345678901"))
        .await;

    let cases = [
        CreatePaymentRequest {
            payer_id: String::new(),
            ..request(&s)
        },
        CreatePaymentRequest {
            payee_id: "not-a-uuid".into(),
            ..request(&s)
        },
        CreatePaymentRequest {
            amount: dec!(0),
            ..request(&s)
        },
        CreatePaymentRequest {
            amount: dec!(-10),
            ..request(&s)
        },
        CreatePaymentRequest {
            description: " ".into(),
            ..request(&s)
        },
        CreatePaymentRequest {
            payee_id: bad_wallet.to_string(),
            ..request(&s)
        },
    ];

    for case in cases {
        let err = s.orchestrator.create_payment(case).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)), "{err}");
    }
    assert_eq!(s.gateway.charge_calls(), 0);
    assert!(s.journal.open_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let s = setup().await;
    let err = s
        .orchestrator
        .create_payment(CreatePaymentRequest {
            payee_id: UserId::new().to_string(),
            ..request(&s)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::NotFound { entity: "User", .. }));
    assert_eq!(s.gateway.charge_calls(), 0);
}

#[tokio::test]
async fn test_gateway_failure_surfaces_upstream_error() {
    let s = setup().await;
    s.gateway.fail_funding(true);

    let err = s.orchestrator.create_payment(request(&s)).await.unwrap_err();
    assert!(matches!(err, PaymentError::Upstream { status: Some(503), .. }));
    assert!(s.orchestrator.list_payments(None, None).await.unwrap().is_empty());
}

// ============================================================================
// Confirmation and disbursement gates
// ============================================================================

#[tokio::test]
async fn test_confirm_twice_is_conflict() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    let id = payment.id.to_string();

    let confirmed = s.orchestrator.confirm_payment(&id).await.unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Succeeded);
    assert!(confirmed.updated_at >= payment.updated_at);
    assert_eq!(confirmed.created_at, payment.created_at);

    let err = s.orchestrator.confirm_payment(&id).await.unwrap_err();
    assert!(matches!(err, PaymentError::Conflict { .. }));

    let stored = s.orchestrator.get_payment(&id).await.unwrap();
    assert_eq!(stored.updated_at, confirmed.updated_at);
}

#[tokio::test]
async fn test_confirm_unknown_payment_is_not_found() {
    let s = setup().await;
    let err = s
        .orchestrator
        .confirm_payment(&PaymentId::new().to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));
}

#[tokio::test]
async fn test_disbursement_refused_on_pending() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();

    let err = s
        .orchestrator
        .create_disbursement(&payment.id.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Conflict { .. }));
    assert_eq!(s.gateway.disbursement_calls(), 0);
}

#[tokio::test]
async fn test_disbursement_refused_on_expired() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    s.orchestrator
        .handle_webhook(&json!({
            "event": "charge.expired",
            "data": { "id": payment.funding.id(), "status": "EXPIRED" }
        }))
        .await
        .unwrap();

    let err = s
        .orchestrator
        .create_disbursement(&payment.id.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Conflict { .. }));
    assert_eq!(s.gateway.disbursement_calls(), 0);

    // Terminal: a late paid event cannot revive it
    s.orchestrator
        .handle_webhook(&paid_event(payment.funding.id()))
        .await
        .unwrap();
    let stored = s.orchestrator.get_payment(&payment.id.to_string()).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Expired);
    assert_eq!(s.gateway.disbursement_calls(), 0);
}

#[tokio::test]
async fn test_manual_disbursement_request() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    let id = payment.id.to_string();
    s.orchestrator.confirm_payment(&id).await.unwrap();

    let disbursed = s.orchestrator.create_disbursement(&id).await.unwrap();
    let disbursement = disbursed.disbursement.clone().unwrap();
    assert_eq!(disbursement.status, DisbursementStatus::Pending);
    assert!(disbursement.id.is_some());
    assert_eq!(
        disbursement.reference_id,
        format!("{}-disb", payment.reference_id)
    );

    let sent = s.gateway.disbursement_requests().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].account_number, "09123456789");
    assert_eq!(sent[0].account_holder_name, "Maria Santos");
    assert_eq!(sent[0].amount, dec!(500.0));
    assert_eq!(sent[0].reference_id, disbursement.reference_id);

    // Already disbursed
    let err = s.orchestrator.create_disbursement(&id).await.unwrap_err();
    assert!(matches!(err, PaymentError::Conflict { .. }));
    assert_eq!(s.gateway.disbursement_calls(), 1);
}

// ============================================================================
// Webhooks
// ============================================================================

#[tokio::test]
async fn test_paid_webhook_disburses_and_completion_finalizes() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();

    let outcome = s
        .orchestrator
        .handle_webhook(&paid_event(payment.funding.id()))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
    assert_eq!(s.gateway.disbursement_calls(), 1);

    let after_paid = s.orchestrator.get_payment(&payment.id.to_string()).await.unwrap();
    assert_eq!(after_paid.status, PaymentStatus::Succeeded);
    let disbursement_id = after_paid.disbursement_id().unwrap().to_string();
    assert!(!after_paid.is_terminal());

    let outcome = s
        .orchestrator
        .handle_webhook(&disbursement_completed(&disbursement_id))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));

    let done = s.orchestrator.get_payment(&payment.id.to_string()).await.unwrap();
    assert_eq!(
        done.disbursement.as_ref().map(|d| d.status),
        Some(DisbursementStatus::Succeeded)
    );
    assert!(done.is_terminal());

    // Redelivery of the completion is harmless
    let outcome = s
        .orchestrator
        .handle_webhook(&disbursement_completed(&disbursement_id))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Unchanged { .. }));
}

#[tokio::test]
async fn test_sequential_duplicate_paid_events_disburse_once() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    let event = paid_event(payment.funding.id());

    s.orchestrator.handle_webhook(&event).await.unwrap();
    let second = s.orchestrator.handle_webhook(&event).await.unwrap();

    assert!(matches!(second, WebhookOutcome::Unchanged { .. }));
    assert_eq!(s.gateway.disbursement_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_paid_events_disburse_once() {
    let s = setup_with(
        MockGateway::new().with_latency(Duration::from_millis(50)),
        Arc::new(MemoryPaymentStore::new()),
        FundingProduct::EwalletCharge,
    )
    .await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    let event = paid_event(payment.funding.id());

    let deliveries: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = s.orchestrator.clone();
            let event = event.clone();
            tokio::spawn(async move { orchestrator.handle_webhook(&event).await })
        })
        .collect();

    for delivery in deliveries {
        delivery.await.unwrap().unwrap();
    }

    assert_eq!(s.gateway.disbursement_calls(), 1);
    let stored = s.orchestrator.get_payment(&payment.id.to_string()).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Succeeded);
    assert!(stored.disbursement_id().is_some());
}

#[tokio::test]
async fn test_failed_disbursement_is_retried_on_redelivery() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    let event = paid_event(payment.funding.id());

    s.gateway.fail_disbursements(true);
    let err = s.orchestrator.handle_webhook(&event).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(!err.is_permanent_webhook_rejection());

    let stuck = s.orchestrator.get_payment(&payment.id.to_string()).await.unwrap();
    assert_eq!(stuck.status, PaymentStatus::Succeeded);
    assert!(stuck.disbursement.is_none());

    s.gateway.fail_disbursements(false);
    let outcome = s.orchestrator.handle_webhook(&event).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
    assert_eq!(s.gateway.disbursement_calls(), 2);
    assert_eq!(s.gateway.disbursement_requests().await.len(), 1);
}

#[tokio::test]
async fn test_webhook_for_unknown_charge_is_not_found() {
    let s = setup().await;
    let err = s
        .orchestrator
        .handle_webhook(&paid_event("ewc_unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));
    assert!(!err.is_permanent_webhook_rejection());

    let err = s
        .orchestrator
        .handle_webhook(&disbursement_completed("disb_unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));
}

#[tokio::test]
async fn test_malformed_webhook_is_permanent_rejection() {
    let s = setup().await;
    let err = s
        .orchestrator
        .handle_webhook(&json!({ "data": { "id": "ewc_1" } }))
        .await
        .unwrap_err();
    assert!(err.is_permanent_webhook_rejection());

    let err = s
        .orchestrator
        .handle_webhook(&json!({ "event": "charge.paid" }))
        .await
        .unwrap_err();
    assert!(err.is_permanent_webhook_rejection());
}

#[tokio::test]
async fn test_pending_event_changes_nothing() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();

    let outcome = s
        .orchestrator
        .handle_webhook(&json!({
            "event": "ewallet.charge",
            "data": { "id": payment.funding.id(), "status": "PENDING" }
        }))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

    let stored = s.orchestrator.get_payment(&payment.id.to_string()).await.unwrap();
    assert_eq!(stored, payment);
}

// ============================================================================
// Polling, invoices, listing
// ============================================================================

#[tokio::test]
async fn test_refresh_applies_polled_status() {
    let s = setup().await;
    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    let id = payment.id.to_string();

    let unchanged = s.orchestrator.refresh_payment(&id).await.unwrap();
    assert_eq!(unchanged.status, PaymentStatus::Pending);
    assert_eq!(s.gateway.status_calls(), 1);

    s.gateway
        .set_remote_status(payment.funding.id(), "SUCCEEDED")
        .await;
    let refreshed = s.orchestrator.refresh_payment(&id).await.unwrap();
    assert_eq!(refreshed.status, PaymentStatus::Succeeded);
    assert!(refreshed.disbursement.is_some());
    assert_eq!(s.gateway.disbursement_calls(), 1);

    // Nothing left to poll
    s.orchestrator.refresh_payment(&id).await.unwrap();
    assert_eq!(s.gateway.status_calls(), 2);
}

#[tokio::test]
async fn test_invoice_flow() {
    let s = setup_with(
        MockGateway::new(),
        Arc::new(MemoryPaymentStore::new()),
        FundingProduct::Invoice,
    )
    .await;

    let payment = s.orchestrator.create_payment(request(&s)).await.unwrap();
    assert!(matches!(payment.funding, FundingRef::Invoice(_)));
    assert_eq!(s.gateway.invoice_calls(), 1);
    assert_eq!(s.gateway.charge_calls(), 0);

    let err = s
        .orchestrator
        .refresh_payment(&payment.id.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));

    s.orchestrator
        .handle_webhook(&json!({
            "event": "invoice.paid",
            "data": { "id": payment.funding.id(), "status": "SETTLED" }
        }))
        .await
        .unwrap();
    assert_eq!(s.gateway.disbursement_calls(), 1);
}

#[tokio::test]
async fn test_invoice_requires_payer_email() {
    let s = setup_with(
        MockGateway::new(),
        Arc::new(MemoryPaymentStore::new()),
        FundingProduct::Invoice,
    )
    .await;
    let no_email = s
        .users
        .add(User::new("No Email", "", "09170000000"))
        .await;

    let err = s
        .orchestrator
        .create_payment(CreatePaymentRequest {
            payer_id: no_email.to_string(),
            ..request(&s)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
    assert_eq!(s.gateway.invoice_calls(), 0);
}

#[tokio::test]
async fn test_listing_filters() {
    let s = setup().await;
    let first = s.orchestrator.create_payment(request(&s)).await.unwrap();
    let second = s.orchestrator.create_payment(request(&s)).await.unwrap();
    s.orchestrator
        .confirm_payment(&first.id.to_string())
        .await
        .unwrap();

    let all = s.orchestrator.list_payments(None, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].created_at >= all[1].created_at);

    let pending = s
        .orchestrator
        .list_payments(Some(PaymentStatus::Pending), None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id);

    let future = Utc::now() + chrono::Duration::days(1);
    let window = DateRange::new(future, future + chrono::Duration::days(1)).unwrap();
    assert!(s
        .orchestrator
        .list_payments(None, Some(window))
        .await
        .unwrap()
        .is_empty());

    let for_payee = s
        .orchestrator
        .list_payments_for_user(&s.payee.to_string(), None, None)
        .await
        .unwrap();
    assert_eq!(for_payee.len(), 2);

    let err = s
        .orchestrator
        .list_payments_for_user(&UserId::new().to_string(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotFound { .. }));
}

// ============================================================================
// Partial failure and reconciliation
// ============================================================================

/// Store whose inserts, or its next payout record, can be made to fail
struct FlakyStore {
    inner: MemoryPaymentStore,
    fail_inserts: AtomicBool,
    fail_next_record: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryPaymentStore::new(),
            fail_inserts: AtomicBool::new(false),
            fail_next_record: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PaymentStore for FlakyStore {
    async fn insert(&self, payment: &Payment) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(PaymentError::Storage("connection reset".into()));
        }
        self.inner.insert(payment).await
    }

    async fn get(&self, selector: &Selector) -> Result<Option<Payment>> {
        self.inner.get(selector).await
    }

    async fn update_status(&self, selector: &Selector, transition: &Transition) -> Result<Payment> {
        if matches!(transition, Transition::RecordDisbursement { .. })
            && self.fail_next_record.swap(false, Ordering::SeqCst)
        {
            return Err(PaymentError::Storage("connection reset".into()));
        }
        self.inner.update_status(selector, transition).await
    }

    async fn query(&self, query: &PaymentQuery) -> Result<Vec<Payment>> {
        self.inner.query(query).await
    }
}

#[tokio::test]
async fn test_accepted_but_unstored_payment_is_recovered() {
    let store = Arc::new(FlakyStore::new());
    store.fail_inserts.store(true, Ordering::SeqCst);
    let s = setup_with(MockGateway::new(), store.clone(), FundingProduct::EwalletCharge).await;

    let err = s.orchestrator.create_payment(request(&s)).await.unwrap_err();
    assert!(matches!(err, PaymentError::Storage(_)));
    assert_eq!(s.gateway.charge_calls(), 1);
    assert_eq!(s.journal.open_entries().await.unwrap().len(), 1);

    store.fail_inserts.store(false, Ordering::SeqCst);
    let report = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert_eq!(report.recovered.len(), 1);
    assert!(report.unresolved.is_empty());

    let recovered = s
        .orchestrator
        .get_payment(&report.recovered[0].to_string())
        .await
        .unwrap();
    assert_eq!(recovered.amount, dec!(500.0));
    assert_eq!(recovered.status, PaymentStatus::Pending);

    // The gateway's webhook now finds it
    s.orchestrator
        .handle_webhook(&paid_event(recovered.funding.id()))
        .await
        .unwrap();
    assert_eq!(s.gateway.disbursement_calls(), 1);

    let again = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert!(again.recovered.is_empty());
    assert_eq!(again.already_stored, 0);
}

#[tokio::test]
async fn test_intent_with_unknown_outcome_is_reported() {
    let s = setup().await;
    let now = Utc::now();
    let reference_id = ReferenceId::generate();
    s.journal
        .append(&IntentEntry {
            reference_id: reference_id.clone(),
            payment_id: PaymentId::new(),
            payer_id: s.payer,
            payee_id: s.payee,
            amount: dec!(75),
            title: "T".into(),
            description: "D".into(),
            state: IntentState::Recorded,
            recorded_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let report = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert!(report.recovered.is_empty());
    assert_eq!(report.unresolved, vec![reference_id.to_string()]);
    assert!(s.orchestrator.list_payments(None, None).await.unwrap().is_empty());
}

fn no_grace() -> OrchestratorConfig {
    OrchestratorConfig {
        reconcile_grace: Duration::ZERO,
        ..OrchestratorConfig::default()
    }
}

/// Payment whose payout the gateway accepted but the store never recorded
async fn stranded_payout(s: &Setup, store: &FlakyStore) -> Payment {
    let payment = s.orchestrator.create_payment(request(s)).await.unwrap();
    store.fail_next_record.store(true, Ordering::SeqCst);

    let err = s
        .orchestrator
        .handle_webhook(&paid_event(payment.funding.id()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Storage(_)));
    assert_eq!(s.gateway.disbursement_calls(), 1);

    let stuck = s.orchestrator.get_payment(&payment.id.to_string()).await.unwrap();
    assert_eq!(stuck.disbursement.as_ref().unwrap().status, DisbursementStatus::Initiating);
    assert!(stuck.disbursement_id().is_none());
    stuck
}

#[tokio::test]
async fn test_unrecorded_payout_is_resumed_by_reconciliation() {
    let store = Arc::new(FlakyStore::new());
    let s = setup_with_config(MockGateway::new(), store.clone(), no_grace()).await;
    let stuck = stranded_payout(&s, &store).await;

    let report = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert_eq!(report.resumed_disbursements, vec![stuck.id]);
    assert!(report.unresolved.is_empty());

    // Re-sent under the same idempotency key: one payout at the gateway
    assert_eq!(s.gateway.disbursement_calls(), 2);
    let requests = s.gateway.disbursement_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].reference_id, stuck.reference_id.disbursement());

    let resumed = s.orchestrator.get_payment(&stuck.id.to_string()).await.unwrap();
    let disbursement_id = resumed.disbursement_id().unwrap().to_string();
    assert_eq!(resumed.disbursement.as_ref().unwrap().status, DisbursementStatus::Pending);

    // The gateway's completion callback now finds the payment
    let outcome = s
        .orchestrator
        .handle_webhook(&disbursement_completed(&disbursement_id))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));

    let next = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert!(next.resumed_disbursements.is_empty());
}

#[tokio::test]
async fn test_unrecorded_payout_is_resumed_on_redelivery() {
    let store = Arc::new(FlakyStore::new());
    let s = setup_with_config(MockGateway::new(), store.clone(), no_grace()).await;
    let stuck = stranded_payout(&s, &store).await;

    let outcome = s
        .orchestrator
        .handle_webhook(&paid_event(stuck.funding.id()))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
    assert_eq!(s.gateway.disbursement_requests().await.len(), 1);

    let resumed = s.orchestrator.get_payment(&stuck.id.to_string()).await.unwrap();
    assert!(resumed.disbursement_id().is_some());
}

#[tokio::test]
async fn test_fresh_payout_claim_is_left_alone() {
    let store = Arc::new(FlakyStore::new());
    let s = setup_with(MockGateway::new(), store.clone(), FundingProduct::EwalletCharge).await;
    let stuck = stranded_payout(&s, &store).await;

    // Inside the grace period the first call may still be running
    let outcome = s
        .orchestrator
        .handle_webhook(&paid_event(stuck.funding.id()))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::Unchanged { .. }));
    let report = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert!(report.resumed_disbursements.is_empty());
    assert_eq!(s.gateway.disbursement_calls(), 1);
}

fn recorded_intent(s: &Setup, reference_id: &ReferenceId) -> IntentEntry {
    let now = Utc::now();
    IntentEntry {
        reference_id: reference_id.clone(),
        payment_id: PaymentId::new(),
        payer_id: s.payer,
        payee_id: s.payee,
        amount: dec!(120),
        title: "T".into(),
        description: "D".into(),
        state: IntentState::Recorded,
        recorded_at: now,
        updated_at: now,
    }
}

fn charge_for(reference_id: &ReferenceId) -> ChargeRequest {
    ChargeRequest {
        reference_id: reference_id.to_string(),
        amount: dec!(120),
        currency: "PHP".into(),
        mobile_number: "+639171112222".into(),
        title: "T".into(),
        description: "D".into(),
        callbacks: CallbackUrls {
            success: "http://localhost:3000/success".into(),
            failure: "http://localhost:3000/failure".into(),
        },
    }
}

#[tokio::test]
async fn test_recorded_intent_found_at_gateway_is_recovered() {
    let s = setup_with_config(
        MockGateway::new(),
        Arc::new(MemoryPaymentStore::new()),
        no_grace(),
    )
    .await;

    // Gateway created the charge; the process died before journaling it
    let reference_id = ReferenceId::generate();
    let charge = s.gateway.create_charge(&charge_for(&reference_id)).await.unwrap();
    s.journal.append(&recorded_intent(&s, &reference_id)).await.unwrap();

    let report = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert_eq!(report.recovered.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(s.gateway.lookup_calls(), 1);

    let recovered = s
        .orchestrator
        .get_payment(&report.recovered[0].to_string())
        .await
        .unwrap();
    assert_eq!(recovered.funding, charge.funding);
    assert_eq!(recovered.amount, dec!(120));
    assert!(s.journal.open_entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recorded_intent_unknown_to_gateway_is_failed() {
    let s = setup_with_config(
        MockGateway::new(),
        Arc::new(MemoryPaymentStore::new()),
        no_grace(),
    )
    .await;
    let reference_id = ReferenceId::generate();
    s.journal.append(&recorded_intent(&s, &reference_id)).await.unwrap();

    let report = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert_eq!(report.failed, vec![reference_id.to_string()]);
    assert!(report.recovered.is_empty());

    let entry = s.journal.get(reference_id.as_str()).await.unwrap();
    assert!(matches!(entry.state, IntentState::Failed { .. }));
    assert!(s.orchestrator.list_payments(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gateway_lookup_failure_leaves_intent_open() {
    let s = setup_with_config(
        MockGateway::new(),
        Arc::new(MemoryPaymentStore::new()),
        no_grace(),
    )
    .await;
    let reference_id = ReferenceId::generate();
    s.journal.append(&recorded_intent(&s, &reference_id)).await.unwrap();
    s.gateway.fail_funding(true);

    let report = s.orchestrator.reconcile_in_flight().await.unwrap();
    assert_eq!(report.unresolved, vec![reference_id.to_string()]);
    assert_eq!(s.journal.open_entries().await.unwrap().len(), 1);
}
