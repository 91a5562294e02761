//! Data model for recurring-payment subscriptions.
//!
//! A [`Subscription`] is one counterparty relationship, keyed by
//! (merchant ID, subscription ID). It owns the current set of
//! [`Contract`] term sheets and the full [`PaymentRecord`] history.
//! History outlives contract cancellation: a record may reference a
//! contract ID that is no longer in the current set.
//!
//! All monetary amounts are `rust_decimal::Decimal`; no floats appear
//! anywhere in the money path. Timestamps are Unix seconds (UTC).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use time::{Date, Duration, Month, OffsetDateTime, Time};

/// Current wall-clock time as Unix seconds (UTC).
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

// ──────────────────────────────────────────────
// Opaque identifiers
// ──────────────────────────────────────────────

/// Opaque subscription identifier, assigned by the merchant at signup.
///
/// Stored as raw bytes; rendered as standard base64 in JSON and in
/// display output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Vec<u8>);

impl SubscriptionId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        SubscriptionId(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Opaque contract identifier, unique within a subscription's current
/// contract set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractId(Vec<u8>);

impl ContractId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ContractId(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(&self.0))
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(&self.0))
    }
}

impl Serialize for SubscriptionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for SubscriptionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(&encoded)
            .map(SubscriptionId)
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for ContractId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ContractId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(&encoded)
            .map(ContractId)
            .map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for opaque byte fields rendered as base64 strings.
pub(crate) mod base64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for optional opaque byte fields.
pub(crate) mod base64_bytes_opt {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&BASE64.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            Some(s) => BASE64
                .decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ──────────────────────────────────────────────
// Contracts
// ──────────────────────────────────────────────

/// How often a contract's spending cap resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
    Annual,
}

impl PeriodType {
    /// Inclusive `[start, end]` bounds (Unix seconds, UTC) of the calendar
    /// period containing `at`.
    ///
    /// Weekly periods start on Monday; monthly and annual periods start on
    /// the first of the month / January 1st.
    pub fn window_containing(&self, at: i64) -> (i64, i64) {
        let date = OffsetDateTime::from_unix_timestamp(at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
            .date();

        let (start, next) = match self {
            PeriodType::Daily => (date, date.saturating_add(Duration::days(1))),
            PeriodType::Weekly => {
                let offset = i64::from(date.weekday().number_days_from_monday());
                let start = date.saturating_sub(Duration::days(offset));
                (start, start.saturating_add(Duration::days(7)))
            }
            PeriodType::Monthly => {
                let start = Date::from_calendar_date(date.year(), date.month(), 1)
                    .unwrap_or(date);
                let next = if date.month() == Month::December {
                    Date::from_calendar_date(date.year() + 1, Month::January, 1)
                } else {
                    Date::from_calendar_date(date.year(), date.month().next(), 1)
                }
                .unwrap_or(start);
                (start, next)
            }
            PeriodType::Annual => {
                let start = Date::from_calendar_date(date.year(), Month::January, 1)
                    .unwrap_or(date);
                let next =
                    Date::from_calendar_date(date.year() + 1, Month::January, 1).unwrap_or(start);
                (start, next)
            }
        };

        (day_start(start), day_start(next) - 1)
    }
}

fn day_start(date: Date) -> i64 {
    date.with_time(Time::MIDNIGHT).assume_utc().unix_timestamp()
}

/// One term sheet within a subscription: spending caps, period type,
/// validity window, and the endpoint polled for fresh charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: ContractId,
    /// URL polled each cycle for the current charge.
    pub polling_endpoint: String,
    /// Maximum amount the merchant may request per individual charge.
    pub max_amount_per_charge: Decimal,
    /// Maximum total amount across all charges within one period.
    pub max_amount_per_period: Decimal,
    pub period_type: PeriodType,
    /// Unix seconds at which the contract becomes chargeable.
    pub start_time: i64,
    /// Unix seconds after which the contract is cancelled. Absent means
    /// open-ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl Contract {
    /// A contract is active iff its validity window contains `now`.
    pub fn is_active(&self, now: i64) -> bool {
        self.start_time <= now && self.end_time.map_or(true, |end| end >= now)
    }

    /// A contract is cancelled iff its end time has passed.
    ///
    /// Cancelled contracts are dropped from the current set on the next
    /// merge; their payment history is retained.
    pub fn is_cancelled(&self, now: i64) -> bool {
        self.end_time.map_or(false, |end| end <= now)
    }
}

// ──────────────────────────────────────────────
// Payments
// ──────────────────────────────────────────────

/// One output of a payment: an amount plus the opaque script it pays to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOutput {
    pub amount: Decimal,
    #[serde(with = "base64_bytes")]
    pub script: Vec<u8>,
}

/// Prepared payment metadata for one charge, as returned by a payment
/// session refresh. Opaque to the store; the reconciler forwards it to
/// the policy hook and the payment-send collaborator unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Where the signed payment is submitted.
    pub payment_endpoint: String,
    pub outputs: Vec<PaymentOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes_opt"
    )]
    pub merchant_data: Option<Vec<u8>>,
}

impl PaymentRequest {
    /// Total amount across all outputs.
    pub fn total_amount(&self) -> Decimal {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// Historical evidence of one executed charge against a contract.
///
/// The amount is reconstructed from the recorded outputs rather than
/// stored separately, so the ledger and the payment-protocol metadata
/// cannot drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub contract_id: ContractId,
    /// Unix seconds at which the payment was sent.
    pub timestamp: i64,
    pub outputs: Vec<PaymentOutput>,
}

impl PaymentRecord {
    /// Total amount of this payment.
    pub fn amount(&self) -> Decimal {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

// ──────────────────────────────────────────────
// Subscriptions
// ──────────────────────────────────────────────

/// One counterparty relationship: the current contract set plus the
/// full payment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub merchant_id: String,
    pub subscription_id: SubscriptionId,
    pub contracts: Vec<Contract>,
    #[serde(default)]
    pub payments: Vec<PaymentRecord>,
}

impl Subscription {
    /// Look up a contract in the current set by ID.
    pub fn contract(&self, contract_id: &ContractId) -> Option<&Contract> {
        self.contracts.iter().find(|c| &c.contract_id == contract_id)
    }

    /// Contracts whose validity window contains `now`, in stored order.
    pub fn active_contracts(&self, now: i64) -> impl Iterator<Item = &Contract> {
        self.contracts.iter().filter(move |c| c.is_active(now))
    }
}

/// A freshly-negotiated contract bundle, as received out-of-band from a
/// merchant at subscription-signup time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractBundle {
    pub merchant_id: String,
    pub subscription_id: SubscriptionId,
    pub contracts: Vec<Contract>,
}

/// The terms received when a payment is first negotiated: the immediate
/// payment request, plus recurring terms when the merchant offers a
/// subscription.
///
/// Recurring terms must only ever appear here; a polled refresh that
/// carries them is a protocol violation and is skipped by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiatedTerms {
    pub payment: PaymentRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring: Option<ContractBundle>,
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
