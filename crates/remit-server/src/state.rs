//! Application State

use std::sync::Arc;

use remit_payments::PaymentOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Payment state machine
    pub orchestrator: Arc<PaymentOrchestrator>,

    /// Expected `x-callback-token` on gateway webhooks
    pub callback_token: Arc<str>,
}
