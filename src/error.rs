//! Typed error taxonomy.
//!
//! Library-internal errors are `thiserror` enums; the axum handler layer
//! collapses them into HTTP responses, and anything unexpected propagates
//! as `anyhow::Error` per spec.md §7.

use thiserror::Error;

/// Errors an adapter call can fail with.
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("adapter call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transient downstream failure: {0}")]
    Transient(String),
    #[error("permanent decline: {code}: {message}")]
    Declined { code: String, message: String },
}

/// Raised by the circuit breaker when a call is refused outright.
#[derive(Debug, Error, Clone, Copy)]
#[error("call not permitted: breaker is open")]
pub struct CallNotPermitted;

/// Idempotency / durable store failures. Always logged and treated as a
/// miss by callers per spec.md §4.2 — never surfaced to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connectivity failure: {0}")]
    Connectivity(#[from] rusqlite::Error),
    #[error("deserialization failure: {0}")]
    Deserialization(#[from] serde_json::Error),
    #[error("integrity violation (duplicate key, expected and swallowed): {0}")]
    Integrity(String),
}

/// Failure taxonomy for the payment orchestrator's caller-visible outcomes.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0:?}")]
    Validation(std::collections::HashMap<String, String>),
    #[error("no PSP available after {attempts} attempted adapter(s)")]
    NoPspAvailable { attempts: usize },
}

/// Refund failure codes, exactly spec.md §4.7 / §6's taxonomy.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RefundFailureCode {
    #[error("REFUND_AMOUNT_EXCEEDED")]
    AmountExceeded,
    #[error("REFUND_LIMIT_EXCEEDED")]
    LimitExceeded,
    #[error("ADAPTER_NOT_FOUND")]
    AdapterNotFound,
    #[error("REFUND_NOT_SUPPORTED")]
    NotSupported,
    #[error("INVALID_RESULT")]
    InvalidResult,
    #[error("REFUND_EXECUTION_FAILED")]
    ExecutionFailed,
    #[error("PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[error("PAYMENT_NOT_REFUNDABLE")]
    PaymentNotRefundable,
}

impl RefundFailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmountExceeded => "REFUND_AMOUNT_EXCEEDED",
            Self::LimitExceeded => "REFUND_LIMIT_EXCEEDED",
            Self::AdapterNotFound => "ADAPTER_NOT_FOUND",
            Self::NotSupported => "REFUND_NOT_SUPPORTED",
            Self::InvalidResult => "INVALID_RESULT",
            Self::ExecutionFailed => "REFUND_EXECUTION_FAILED",
            Self::PaymentNotFound => "PAYMENT_NOT_FOUND",
            Self::PaymentNotRefundable => "PAYMENT_NOT_REFUNDABLE",
        }
    }
}
