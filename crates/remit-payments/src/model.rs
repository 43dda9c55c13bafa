//! Domain Models
//!
//! Payment records, the users they reference, and the status transitions a
//! payment may go through. `rust_decimal` is used for every amount.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PaymentError, Result};

/// Local payment identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a caller-supplied id
    pub fn parse(s: &str) -> Result<Self> {
        parse_uuid(s, "payment_id").map(Self)
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier, owned by the user store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        parse_uuid(s, "user_id").map(Self)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(PaymentError::Validation(format!("{field} cannot be empty")));
    }
    Uuid::parse_str(trimmed)
        .map_err(|e| PaymentError::Validation(format!("invalid {field} format: {e}")))
}

/// Correlation token embedded in gateway requests
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceId(String);

impl ReferenceId {
    /// Generate a fresh reference id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Reference id used for the payout of this payment
    pub fn disbursement(&self) -> String {
        format!("{}-disb", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mobile wallet number in local format: `0` followed by ten digits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletNumber(String);

impl WalletNumber {
    pub const LEN: usize = 11;

    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.starts_with('0')
            || s.len() != Self::LEN
            || !s.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(PaymentError::Validation(
                "wallet number must start with 0 and be 11 digits".into(),
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// International form, e.g. `09123456789` with `+63` → `+639123456789`
    pub fn to_international(&self, dial_code: &str) -> String {
        format!("{dial_code}{}", &self.0[1..])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Financial status of a payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCEEDED" => Ok(PaymentStatus::Succeeded),
            "EXPIRED" => Ok(PaymentStatus::Expired),
            other => Err(PaymentError::Validation(format!(
                "invalid status {other:?}, must be PENDING, SUCCEEDED or EXPIRED"
            ))),
        }
    }
}

/// Payout sub-state, only present once the payment has SUCCEEDED
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisbursementStatus {
    /// Claimed locally, gateway call in flight
    Initiating,
    Pending,
    Succeeded,
}

impl DisbursementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementStatus::Initiating => "INITIATING",
            DisbursementStatus::Pending => "PENDING",
            DisbursementStatus::Succeeded => "SUCCEEDED",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disbursement {
    /// Gateway disbursement id, absent while `Initiating`
    pub id: Option<String>,
    pub reference_id: String,
    pub status: DisbursementStatus,
}

/// Gateway product that collected the funds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FundingRef {
    Charge(String),
    Invoice(String),
}

impl FundingRef {
    pub fn id(&self) -> &str {
        match self {
            FundingRef::Charge(id) | FundingRef::Invoice(id) => id,
        }
    }
}

/// A payment record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub reference_id: ReferenceId,
    pub payer_id: UserId,
    pub payee_id: UserId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub title: String,
    pub description: String,
    pub status: PaymentStatus,
    pub funding: FundingRef,
    pub disbursement: Option<Disbursement>,
    pub checkout_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a new payment is built from
#[derive(Clone, Debug)]
pub struct NewPayment {
    pub id: PaymentId,
    pub reference_id: ReferenceId,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub amount: Decimal,
    pub title: String,
    pub description: String,
    pub status: PaymentStatus,
    pub funding: FundingRef,
    pub checkout_url: Option<String>,
}

impl Payment {
    pub fn new(fields: NewPayment) -> Self {
        let now = Utc::now();
        Self {
            id: fields.id,
            reference_id: fields.reference_id,
            payer_id: fields.payer_id,
            payee_id: fields.payee_id,
            amount: fields.amount,
            title: fields.title,
            description: fields.description,
            status: fields.status,
            funding: fields.funding,
            disbursement: None,
            checkout_url: fields.checkout_url,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn disbursement_id(&self) -> Option<&str> {
        self.disbursement.as_ref().and_then(|d| d.id.as_deref())
    }

    /// No transition is possible from here
    pub fn is_terminal(&self) -> bool {
        self.status == PaymentStatus::Expired
            || self
                .disbursement
                .as_ref()
                .is_some_and(|d| d.status == DisbursementStatus::Succeeded)
    }

    /// Human-readable combined state, used in conflict errors and logs
    pub fn state_label(&self) -> String {
        match &self.disbursement {
            Some(d) => format!("{}/DISBURSEMENT_{}", self.status, d.status.as_str()),
            None => self.status.to_string(),
        }
    }

    /// Apply a transition if the current state is its expected pre-state
    pub fn apply(&mut self, transition: &Transition) -> Result<()> {
        match transition {
            Transition::Confirm => {
                self.require(self.status == PaymentStatus::Pending, "PENDING")?;
                self.status = PaymentStatus::Succeeded;
            }
            Transition::Expire => {
                self.require(self.status == PaymentStatus::Pending, "PENDING")?;
                self.status = PaymentStatus::Expired;
            }
            Transition::ClaimDisbursement { reference_id } => {
                self.require(
                    self.status == PaymentStatus::Succeeded && self.disbursement.is_none(),
                    "SUCCEEDED without a disbursement",
                )?;
                self.disbursement = Some(Disbursement {
                    id: None,
                    reference_id: reference_id.clone(),
                    status: DisbursementStatus::Initiating,
                });
            }
            Transition::ReleaseDisbursement => {
                self.require(
                    self.disbursement_is(DisbursementStatus::Initiating),
                    "DISBURSEMENT_INITIATING",
                )?;
                self.disbursement = None;
            }
            Transition::RecordDisbursement { id, status } => {
                self.require(
                    self.disbursement_is(DisbursementStatus::Initiating),
                    "DISBURSEMENT_INITIATING",
                )?;
                if let Some(d) = self.disbursement.as_mut() {
                    d.id = Some(id.clone());
                    d.status = match status {
                        DisbursementStatus::Initiating => DisbursementStatus::Pending,
                        other => *other,
                    };
                }
            }
            Transition::CompleteDisbursement => {
                self.require(
                    self.disbursement_is(DisbursementStatus::Pending),
                    "DISBURSEMENT_PENDING",
                )?;
                if let Some(d) = self.disbursement.as_mut() {
                    d.status = DisbursementStatus::Succeeded;
                }
            }
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    fn disbursement_is(&self, status: DisbursementStatus) -> bool {
        self.disbursement.as_ref().is_some_and(|d| d.status == status)
    }

    fn require(&self, ok: bool, expected: &str) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(PaymentError::Conflict {
                payment_id: self.id.to_string(),
                current: self.state_label(),
                expected: expected.to_string(),
            })
        }
    }
}

/// Conditional state change applied atomically by the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// PENDING → SUCCEEDED
    Confirm,
    /// PENDING → EXPIRED
    Expire,
    /// SUCCEEDED with no payout → payout INITIATING
    ClaimDisbursement { reference_id: String },
    /// payout INITIATING → no payout (gateway call failed)
    ReleaseDisbursement,
    /// payout INITIATING → gateway id and status recorded
    RecordDisbursement {
        id: String,
        status: DisbursementStatus,
    },
    /// payout PENDING → SUCCEEDED
    CompleteDisbursement,
}

/// A platform user, as read from the user store
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub wallet_number: String,
    #[serde(default, skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        full_name: impl Into<String>,
        email: impl Into<String>,
        wallet_number: impl Into<String>,
    ) -> Self {
        Self {
            id: UserId::new(),
            full_name: full_name.into(),
            email: email.into(),
            wallet_number: wallet_number.into(),
            password_hash: String::new(),
            created_at: Utc::now(),
        }
    }
}
