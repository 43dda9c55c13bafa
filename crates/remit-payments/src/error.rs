//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Caller input rejected before any external call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payment, user or gateway correlation id has no local record
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Status precondition violated
    #[error("Conflict: payment {payment_id} is {current}, expected {expected}")]
    Conflict {
        payment_id: String,
        current: String,
        expected: String,
    },

    /// Gateway unreachable or answered outside the allow-list after all retries
    #[error("Gateway {operation} failed after {attempts} attempt(s): status {status:?}, body: {body}")]
    Upstream {
        operation: &'static str,
        attempts: u32,
        status: Option<u16>,
        body: String,
    },

    /// Store failure or store timeout
    #[error("Storage error: {0}")]
    Storage(String),

    /// Intent journal failure
    #[error("Journal error: {0}")]
    Journal(String),

    /// Webhook payload is structurally unusable
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Webhook callback token missing or wrong
    #[error("Webhook authentication failed")]
    WebhookAuth,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only gateway failures. Store errors are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Upstream { .. })
    }

    /// Whether a webhook sender can expect a different outcome on redelivery
    pub fn is_permanent_webhook_rejection(&self) -> bool {
        matches!(
            self,
            PaymentError::WebhookParse(_) | PaymentError::WebhookAuth
        )
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Validation(msg) => msg.clone(),
            PaymentError::NotFound { entity, .. } => format!("{entity} not found."),
            PaymentError::Conflict {
                current, expected, ..
            } => format!("Payment is {current}; this action requires {expected}."),
            PaymentError::Upstream { .. } => {
                "Payment provider is unavailable. Please try again.".into()
            }
            PaymentError::WebhookParse(_) => "Invalid webhook payload.".into(),
            PaymentError::WebhookAuth => "Unauthorized webhook.".into(),
            PaymentError::Config(_) => "Service configuration error.".into(),
            _ => "An error occurred processing your request.".into(),
        }
    }
}
