//! Canonical data model shared by the orchestrators, event log, and risk
//! pipeline. Mirrors spec.md §3 field-for-field.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exact decimal money amount, stored as minor units (cents) to keep the
/// cumulative-refund invariant (I2) immune to floating point drift across
/// many partial refunds. Serializes as a decimal string ("19.99") on the
/// wire rather than a float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid amount: {0}")]
pub struct AmountParseError(String);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_minor_units(minor: i64) -> Self {
        Amount(minor)
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn from_decimal_str(s: &str) -> Result<Self, AmountParseError> {
        let s = s.trim();
        let neg = s.starts_with('-');
        let body = s.trim_start_matches('-');
        let mut parts = body.splitn(2, '.');
        let whole = parts.next().unwrap_or("0");
        let frac = parts.next().unwrap_or("0");
        if frac.len() > 2
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountParseError(s.to_string()));
        }
        let whole_v: i64 = whole.parse().map_err(|_| AmountParseError(s.to_string()))?;
        let frac_padded = format!("{:0<2}", frac);
        let frac_v: i64 = frac_padded
            .parse()
            .map_err(|_| AmountParseError(s.to_string()))?;
        let minor = whole_v * 100 + frac_v;
        Ok(Amount(if neg { -minor } else { minor }))
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = AmountWire::deserialize(deserializer)?;
        match raw {
            AmountWire::Str(s) => Amount::from_decimal_str(&s).map_err(serde::de::Error::custom),
            AmountWire::Num(n) => {
                Amount::from_decimal_str(&format!("{n:.2}")).map_err(serde::de::Error::custom)
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AmountWire {
    Str(String),
    Num(f64),
}

/// ISO-4217 currency code, e.g. "USD".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(pub String);

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        CurrencyCode(s.to_uppercase())
    }
}

/// Payment category, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderType {
    Card,
    Wallet,
    Bnpl,
    BankTransfer,
    Mock,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderType::Card => "CARD",
            ProviderType::Wallet => "WALLET",
            ProviderType::Bnpl => "BNPL",
            ProviderType::BankTransfer => "BANK_TRANSFER",
            ProviderType::Mock => "MOCK",
        };
        write!(f, "{s}")
    }
}

/// Terminal/non-terminal payment status, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Success,
    Captured,
    Failed,
    Reversed,
    Pending,
}

impl PaymentStatus {
    pub fn is_successful(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Captured)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PaymentStatus::Failed)
    }
}

/// `PaymentRequest`, spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub idempotency_key: String,
    pub provider_type: ProviderType,
    pub amount: Amount,
    pub currency_code: CurrencyCode,
    pub merchant_reference: String,
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub client_ip: Option<String>,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub provider_payload: HashMap<String, String>,
}

impl PaymentRequest {
    /// The `testAdapterName` override hook, spec.md §9 — an explicit,
    /// guarded configuration field rather than arbitrary payload
    /// inspection.
    pub fn test_adapter_name(&self) -> Option<&str> {
        self.provider_payload
            .get("testAdapterName")
            .map(|s| s.as_str())
    }
}

/// Optional card identity fields attached to a `PaymentResult`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardIdentity {
    pub card_bin: Option<String>,
    pub card_last4: Option<String>,
    pub network_token: Option<String>,
    pub par: Option<String>,
    pub card_fingerprint: Option<String>,
}

/// `PaymentResult`, spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub idempotency_key: String,
    pub provider_transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: Amount,
    pub currency_code: CurrencyCode,
    pub failure_code: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(flatten)]
    pub card_identity: CardIdentity,
}

impl PaymentResult {
    /// A prior result is well-formed when every required field is
    /// populated; spec.md §4.6 step 1 treats a corrupted record as a miss.
    pub fn is_well_formed(&self) -> bool {
        !self.idempotency_key.is_empty()
            && self.amount.minor_units() >= 0
            && !self.currency_code.0.is_empty()
    }

    /// Equality on result fields excluding metadata-only fields, per
    /// spec.md §8's idempotence law.
    pub fn semantically_eq(&self, other: &PaymentResult) -> bool {
        self.idempotency_key == other.idempotency_key
            && self.provider_transaction_id == other.provider_transaction_id
            && self.status == other.status
            && self.amount == other.amount
            && self.currency_code == other.currency_code
            && self.failure_code == other.failure_code
    }

    pub fn adapter_name(&self) -> Option<&str> {
        self.metadata.get("adapterName").map(|s| s.as_str())
    }
}

/// `RefundRequest`, spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub idempotency_key: String,
    pub payment_idempotency_key: String,
    pub amount: Option<Amount>,
    pub currency_code: Option<CurrencyCode>,
    pub reason: Option<String>,
    pub merchant_reference: Option<String>,
    pub correlation_id: Option<String>,
}

/// `RefundResult`, spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResult {
    pub idempotency_key: String,
    pub payment_idempotency_key: String,
    pub provider_transaction_id: Option<String>,
    pub status: RefundStatus,
    pub amount: Amount,
    pub currency_code: CurrencyCode,
    pub failure_code: Option<String>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Success,
    Failed,
    Pending,
}

/// Event-log entry, spec.md §3 / §4.8.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub event_id: String,
    pub idempotency_key: String,
    pub correlation_id: Option<String>,
    pub provider_type: ProviderType,
    pub provider_transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub amount: Amount,
    pub currency_code: CurrencyCode,
    pub failure_code: Option<String>,
    pub message: Option<String>,
    pub merchant_reference: String,
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub client_ip: Option<String>,
    pub card_identity: CardIdentity,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PaymentRequested,
    PaymentCompleted,
    PaymentFailed,
}

/// Entity dimension an aggregator window is keyed by, spec.md §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Merchant,
    Card,
    Email,
    Ip,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Merchant => "MERCHANT",
            EntityType::Card => "CARD",
            EntityType::Email => "EMAIL",
            EntityType::Ip => "IP",
        };
        write!(f, "{s}")
    }
}

/// Per-entity rolling-window features, spec.md §3 / §4.9.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowFeatures {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_count: u64,
    pub failure_count: u64,
    pub failure_rate: f64,
    /// `rename_all = "camelCase"` would produce "countLast1min" — spec.md
    /// §3 names the field `countLast1Min`, capital M.
    #[serde(rename = "countLast1Min")]
    pub count_last_1min: u64,
    #[serde(rename = "countLast5Min")]
    pub count_last_5min: u64,
    pub avg_amount: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub amount_variance: f64,
    pub amount_trend: i8,
    pub increasing_amount_count: u32,
    pub decreasing_amount_count: u32,
    pub avg_time_gap_seconds: f64,
    pub seconds_since_last_transaction: f64,
    pub hour_of_day: u32,
    pub day_of_week: u32,
    /// Open-question flag: true when the CARD dimension fell back to
    /// `bin+last4+providerType` rather than a real card fingerprint.
    #[serde(default)]
    pub card_identity_is_fallback: bool,
}

/// Signal taxonomy, spec.md §4.10 (exact names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    HighFailureRate,
    HighEmailFailureRate,
    HighIpFailureRate,
    RepeatedFailures,
    HighVelocity,
    HighEmailVelocity,
    HighIpVelocity,
    UnusualAmount,
    ComplianceAnomaly,
    SystemicRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// `RiskAlert`, spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAlert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: AlertLevel,
    pub signal_types: Vec<SignalType>,
    pub risk_score: f64,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub related_event_ids: Vec<String>,
    pub amount: Amount,
    pub currency_code: CurrencyCode,
    pub summary: String,
    pub detailed_explanation: Option<String>,
}
