//! HTTP Handlers

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use remit_payments::{
    verify_callback_token, CreatePaymentRequest, DateRange, Payment, PaymentError,
    PaymentStatus, ReconcileReport, WebhookOutcome, CALLBACK_TOKEN_HEADER,
};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateway: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl ListParams {
    fn parse(&self) -> Result<(Option<PaymentStatus>, Option<DateRange>), PaymentError> {
        let status = self
            .status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .transpose()?;

        let range = match (self.start_date.as_deref(), self.end_date.as_deref()) {
            (Some(start), Some(end)) => Some(DateRange::parse(start, end)?),
            (None, None) => None,
            _ => {
                return Err(PaymentError::Validation(
                    "start_date and end_date must be given together".into(),
                ));
            }
        };
        Ok((status, range))
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Map a core error onto an HTTP status and error code
fn api_error(e: &PaymentError) -> ApiError {
    let (status, code) = match e {
        PaymentError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        PaymentError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        PaymentError::Conflict { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
        PaymentError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
        PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "INVALID_WEBHOOK"),
        PaymentError::WebhookAuth => (StatusCode::UNAUTHORIZED, "INVALID_CALLBACK_TOKEN"),
        PaymentError::Config(_) => (StatusCode::SERVICE_UNAVAILABLE, "PAYMENTS_DISABLED"),
        PaymentError::Storage(_) | PaymentError::Journal(_) | PaymentError::Json(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    };

    if status.is_server_error() {
        tracing::error!(error = %e, code, "Request failed");
    } else {
        tracing::debug!(error = %e, code, "Request rejected");
    }

    (
        status,
        Json(ErrorResponse {
            error: e.user_message(),
            code: code.into(),
        }),
    )
}

fn reply<T>(result: Result<T, PaymentError>) -> ApiResult<T> {
    result.map(Json).map_err(|e| api_error(&e))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gateway: state.orchestrator.gateway_name().to_string(),
    })
}

/// Create a payment and return it with its checkout URL
pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    let payment = state
        .orchestrator
        .create_payment(payload)
        .await
        .map_err(|e| api_error(&e))?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// List payments, optionally by status and created-at window
pub async fn list_payments(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Payment>> {
    let (status, range) = params.parse().map_err(|e| api_error(&e))?;
    reply(state.orchestrator.list_payments(status, range).await)
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Payment> {
    reply(state.orchestrator.get_payment(&id).await)
}

/// Synchronous confirmation (redirect callback path)
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Payment> {
    reply(state.orchestrator.confirm_payment(&id).await)
}

pub async fn create_disbursement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Payment> {
    reply(state.orchestrator.create_disbursement(&id).await)
}

/// Poll the gateway for a pending charge
pub async fn refresh_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Payment> {
    reply(state.orchestrator.refresh_payment(&id).await)
}

/// Payments where the user is payer or payee
pub async fn user_payments(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Payment>> {
    let (status, range) = params.parse().map_err(|e| api_error(&e))?;
    reply(
        state
            .orchestrator
            .list_payments_for_user(&user_id, status, range)
            .await,
    )
}

/// Run one reconciliation pass over the intent journal
pub async fn reconcile(State(state): State<AppState>) -> ApiResult<ReconcileReport> {
    reply(state.orchestrator.reconcile_in_flight().await)
}

/// Gateway webhook
///
/// Malformed payloads get 400 so the gateway stops redelivering; any other
/// failure is a 4xx/5xx that invites redelivery.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<WebhookOutcome> {
    let token = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    verify_callback_token(&state.callback_token, token).map_err(|e| {
        tracing::warn!("Webhook callback token rejected");
        api_error(&e)
    })?;

    let payload: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| api_error(&PaymentError::WebhookParse(e.to_string())))?;

    reply(state.orchestrator.handle_webhook(&payload).await)
}
