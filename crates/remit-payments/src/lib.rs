//! # remit-payments
//!
//! Wallet-to-wallet transfer orchestration: a payer funds a transfer through
//! the payment gateway's e-wallet channel, and once the funds are confirmed
//! the payee is paid out to their own wallet.
//!
//! ## Flow
//!
//! ```text
//! ┌────────────┐  charge/invoice   ┌───────────┐   webhook    ┌──────────────┐
//! │ create_    │──────────────────▶│  Gateway  │─────────────▶│ handle_      │
//! │ payment    │                   │           │              │ webhook      │
//! └────────────┘                   └───────────┘              └──────┬───────┘
//!       │ PENDING                        ▲                           │ SUCCEEDED
//!       ▼                                │ disbursement              ▼
//! ┌────────────┐                         └────────────────── ┌──────────────┐
//! │   Store    │◀──────── conditional status writes ─────────│ create_      │
//! └────────────┘                                             │ disbursement │
//!                                                            └──────────────┘
//! ```
//!
//! ## Pieces
//!
//! - [`gateway`]: the [`PaymentGateway`] trait, the Xendit HTTP client with
//!   bounded retry, and an in-process mock
//! - [`store`]: [`PaymentStore`] with compare-and-swap status transitions
//! - [`orchestrator`]: the state machine tying gateway and store together
//! - [`webhook`]: classification of inbound gateway callbacks
//! - [`journal`]: write-ahead record of gateway calls for crash recovery
//! - [`redact`]: masking of emails and account numbers for logs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use remit_payments::{
//!     CreatePaymentRequest, MemoryIntentJournal, MemoryPaymentStore, MemoryUserDirectory,
//!     MockGateway, OrchestratorConfig, PaymentOrchestrator,
//! };
//!
//! let orchestrator = PaymentOrchestrator::new(
//!     Arc::new(MockGateway::new()),
//!     Arc::new(MemoryPaymentStore::new()),
//!     Arc::new(MemoryUserDirectory::new()),
//!     Arc::new(MemoryIntentJournal::new()),
//!     OrchestratorConfig::default(),
//! );
//!
//! let payment = orchestrator.create_payment(CreatePaymentRequest {
//!     payer_id: payer.to_string(),
//!     payee_id: payee.to_string(),
//!     amount: dec!(500),
//!     title: "Rent share".into(),
//!     description: "October".into(),
//! }).await?;
//!
//! // Send the payer to: payment.checkout_url
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod journal;
pub mod model;
pub mod orchestrator;
pub mod redact;
pub mod store;
pub mod users;
pub mod webhook;

pub use config::{FundingProduct, GatewayConfig, OrchestratorConfig, PaymentsConfig, RetryPolicy};
pub use error::{PaymentError, Result};
pub use gateway::{MockGateway, PaymentGateway, XenditClient};
pub use journal::{FileIntentJournal, IntentJournal, MemoryIntentJournal};
pub use model::{
    Disbursement, DisbursementStatus, FundingRef, Payment, PaymentId, PaymentStatus, User, UserId,
};
pub use orchestrator::{CreatePaymentRequest, PaymentOrchestrator, ReconcileReport, WebhookOutcome};
pub use store::{DateRange, MemoryPaymentStore, PaymentQuery, PaymentStore};
pub use users::{MemoryUserDirectory, UserDirectory};
pub use webhook::{verify_callback_token, WebhookEvent, CALLBACK_TOKEN_HEADER};
