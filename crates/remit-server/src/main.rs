//! Wallet Transfer HTTP Server
//!
//! Axum server exposing the payment orchestrator: payment creation, manual
//! confirmation and payout, status polling, listing and the gateway webhook.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remit_payments::{
    FileIntentJournal, MemoryPaymentStore, MemoryUserDirectory, MockGateway,
    OrchestratorConfig, PaymentGateway, PaymentOrchestrator, PaymentsConfig, User,
    XenditClient,
};

use crate::handlers::{
    confirm_payment, create_disbursement, create_payment, gateway_webhook, get_payment,
    health_check, list_payments, reconcile, refresh_payment, user_payments,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Gateway and configuration
    let mock = std::env::var("GATEWAY_MODE").is_ok_and(|m| m.eq_ignore_ascii_case("mock"));
    let gateway: Arc<dyn PaymentGateway>;
    let config: OrchestratorConfig;
    let callback_token: String;
    if mock {
        tracing::warn!("⚠ GATEWAY_MODE=mock - no real money moves");
        gateway = Arc::new(MockGateway::new());
        config = OrchestratorConfig::from_env().unwrap_or_default();
        callback_token = std::env::var("GATEWAY_CALLBACK_TOKEN")
            .unwrap_or_else(|_| "mock-callback-token".into());
    } else {
        let payments = PaymentsConfig::from_env()?;
        tracing::info!(base_url = %payments.gateway.base_url, "✓ Xendit configured");
        gateway = Arc::new(XenditClient::new(payments.gateway)?);
        config = payments.orchestrator;
        callback_token = payments.callback_token;
    }

    tracing::info!(
        funding = ?config.funding,
        currency = %config.currency,
        callback_base_url = %config.callback_base_url,
        "Orchestrator configured"
    );

    // Stores. The user store is owned elsewhere; seed it from a JSON file for
    // local runs.
    let users = Arc::new(MemoryUserDirectory::new());
    if let Ok(path) = std::env::var("SEED_USERS_FILE") {
        let seeded: Vec<User> = serde_json::from_str(&tokio::fs::read_to_string(&path).await?)?;
        let count = seeded.len();
        for user in seeded {
            users.add(user).await;
        }
        tracing::info!(path = %path, count, "Seeded users");
    }
    let store = Arc::new(MemoryPaymentStore::new());

    let journal_path =
        std::env::var("INTENT_JOURNAL_PATH").unwrap_or_else(|_| "intents.jsonl".into());
    let journal = Arc::new(FileIntentJournal::open(&journal_path).await?);

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateway, store, users, journal, config,
    ));

    // Recover anything the gateway accepted before the last shutdown
    let report = orchestrator.reconcile_in_flight().await?;
    tracing::info!(
        recovered = report.recovered.len(),
        failed = report.failed.len(),
        resumed_disbursements = report.resumed_disbursements.len(),
        unresolved = report.unresolved.len(),
        "Startup reconciliation finished"
    );
    spawn_reconciler(orchestrator.clone(), reconcile_interval()?);

    // Build application state
    let state = AppState {
        orchestrator,
        callback_token: callback_token.into(),
    };

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health
        .route("/health", get(health_check))
        // Payments
        .route("/api/payment", post(create_payment))
        .route("/api/payments", get(list_payments))
        .route("/api/payment/webhook", post(gateway_webhook))
        .route("/api/payment/{id}", get(get_payment))
        .route("/api/payment/{id}/confirm", patch(confirm_payment))
        .route("/api/payment/{id}/disburse", post(create_disbursement))
        .route("/api/payment/{id}/refresh", post(refresh_payment))
        .route("/api/user/{id}/payments", get(user_payments))
        // Operations
        .route("/api/reconcile", post(reconcile))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 remit-server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET   /health                    - Health check");
    tracing::info!("  POST  /api/payment               - Create payment");
    tracing::info!("  GET   /api/payments              - List payments");
    tracing::info!("  GET   /api/payment/{{id}}          - Get payment");
    tracing::info!("  PATCH /api/payment/{{id}}/confirm  - Confirm payment");
    tracing::info!("  POST  /api/payment/{{id}}/disburse - Pay out to payee");
    tracing::info!("  POST  /api/payment/{{id}}/refresh  - Poll gateway status");
    tracing::info!("  GET   /api/user/{{id}}/payments    - Payments for a user");
    tracing::info!("  POST  /api/payment/webhook       - Gateway callbacks");
    tracing::info!("  POST  /api/reconcile             - Reconcile in-flight payments");

    axum::serve(listener, app).await?;

    Ok(())
}

fn reconcile_interval() -> anyhow::Result<Duration> {
    match std::env::var("RECONCILE_INTERVAL_SECS") {
        Ok(v) => {
            let secs: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("RECONCILE_INTERVAL_SECS={v:?}"))?;
            Ok(Duration::from_secs(secs.max(1)))
        }
        Err(_) => Ok(Duration::from_secs(60)),
    }
}

/// Periodic reconciliation of intents and payout claims
fn spawn_reconciler(orchestrator: Arc<PaymentOrchestrator>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick fires immediately; startup already reconciled
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match orchestrator.reconcile_in_flight().await {
                Ok(report)
                    if !report.recovered.is_empty()
                        || !report.failed.is_empty()
                        || !report.resumed_disbursements.is_empty() =>
                {
                    tracing::warn!(
                        recovered = report.recovered.len(),
                        failed = ?report.failed,
                        resumed_disbursements = report.resumed_disbursements.len(),
                        unresolved = ?report.unresolved,
                        "Reconciliation finished interrupted payments"
                    );
                }
                Ok(report) if !report.unresolved.is_empty() => {
                    tracing::debug!(unresolved = ?report.unresolved, "Intents still in flight");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Reconciliation failed"),
            }
        }
    });
}
