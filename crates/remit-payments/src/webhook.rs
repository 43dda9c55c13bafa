//! Gateway Webhook Classification
//!
//! Turns an inbound callback body into a [`WebhookEvent`]. Routing to the
//! state machine happens in [`crate::orchestrator::PaymentOrchestrator::handle_webhook`].

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{PaymentError, Result};
use crate::model::PaymentStatus;

/// Header carrying the shared callback secret
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Parsed webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Charge or invoice lifecycle change, keyed by the gateway funding id
    FundingUpdated {
        event_type: String,
        funding_id: String,
        status: String,
    },

    /// Disbursement completion, keyed by the gateway disbursement id
    DisbursementUpdated {
        event_type: String,
        disbursement_id: String,
        status: String,
    },

    /// Event type the core does not act on
    Other { event_type: String },
}

impl WebhookEvent {
    /// Classify a payload of the form `{"event": .., "data": {"id": .., "status": ..}}`
    ///
    /// Missing `event`, `data` or `data.id` is a permanent rejection. A missing
    /// `data.status` falls back to the last segment of the event name, so
    /// `ewallet.charge.paid` reads as `paid`.
    pub fn parse(payload: &Value) -> Result<Self> {
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| PaymentError::WebhookParse("missing event discriminator".into()))?
            .to_string();

        let data = payload
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| PaymentError::WebhookParse("missing data object".into()))?;

        let id = data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PaymentError::WebhookParse("missing data.id".into()))?
            .to_string();

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                event_type
                    .rsplit('.')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });

        let lowered = event_type.to_lowercase();
        let event = if lowered.contains("disbursement") {
            WebhookEvent::DisbursementUpdated {
                event_type,
                disbursement_id: id,
                status,
            }
        } else if ["charge", "invoice", "capture"]
            .iter()
            .any(|kind| lowered.contains(kind))
        {
            WebhookEvent::FundingUpdated {
                event_type,
                funding_id: id,
                status,
            }
        } else {
            WebhookEvent::Other { event_type }
        };
        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            WebhookEvent::FundingUpdated { event_type, .. }
            | WebhookEvent::DisbursementUpdated { event_type, .. }
            | WebhookEvent::Other { event_type } => event_type,
        }
    }
}

/// Status a funding event moves a PENDING payment to, if any
///
/// Only terminal outcomes act; anything else is a no-op.
pub fn funding_event_outcome(raw: &str) -> Option<PaymentStatus> {
    match raw.trim().to_lowercase().as_str() {
        "paid" | "settled" | "succeeded" => Some(PaymentStatus::Succeeded),
        "expired" => Some(PaymentStatus::Expired),
        _ => None,
    }
}

/// Check the callback token sent by the gateway
pub fn verify_callback_token(expected: &str, provided: Option<&str>) -> Result<()> {
    let Some(provided) = provided else {
        return Err(PaymentError::WebhookAuth);
    };
    if expected.is_empty() {
        return Err(PaymentError::Config(
            "GATEWAY_CALLBACK_TOKEN is not configured".into(),
        ));
    }

    // Compare digests so the comparison length does not depend on input
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.trim().as_bytes());
    let diff = expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));

    if diff == 0 {
        Ok(())
    } else {
        Err(PaymentError::WebhookAuth)
    }
}
