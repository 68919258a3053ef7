//! PSP adapter contract, spec.md §4.1.
//!
//! Each adapter normalizes one PSP's request/response shape into the
//! canonical `PaymentRequest`/`PaymentResult`, exposes a stable identity
//! used as the circuit-breaker and metrics partition key, and declares
//! refund capability by returning `None` from `refund`.

pub mod mock;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::models::{PaymentRequest, PaymentResult, ProviderType, RefundRequest, RefundResult};

#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Payment category this adapter services.
    fn provider_type(&self) -> ProviderType;

    /// Stable, process-unique identity. This is the circuit-breaker and
    /// metrics partition key (spec.md §4.1, §4.6).
    fn adapter_name(&self) -> &str;

    /// Execute a charge. Must populate `amount`, `currency_code`, `status`,
    /// `timestamp`, and `idempotency_key` on every return, and must never
    /// mutate `request`.
    async fn execute(&self, request: &PaymentRequest) -> Result<PaymentResult, AdapterError>;

    /// Issue a refund. `Ok(None)` declares refunds unsupported by this
    /// adapter (spec.md §4.1).
    async fn refund(
        &self,
        request: &RefundRequest,
        amount: crate::models::Amount,
    ) -> Result<Option<RefundResult>, AdapterError>;

    /// Local health signal, independent of the circuit breaker — an
    /// adapter can report unhealthy (e.g. a configuration problem) even
    /// while its breaker is closed.
    fn is_healthy(&self) -> bool {
        true
    }
}
