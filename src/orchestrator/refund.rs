//! Refund orchestrator, spec.md §4.7.
//!
//! Invariant I2 (Σ successful refunds ≤ payment.amount) is enforced by
//! `persistence::Store::reserve_refund`, which checks the cumulative sum
//! and inserts a PENDING placeholder row for the new refund inside a
//! single SQL transaction (spec.md §4.7: "a row lock on the payment key, or
//! an equivalent compare-and-set, is required"). The PENDING row counts
//! toward the sum immediately, so a second concurrent refund request against
//! the same payment sees it even before the adapter call completes; the row
//! is then finalized to its terminal status via `finalize_refund`.

use std::sync::Arc;

use chrono::Utc;

use crate::error::RefundFailureCode;
use crate::idempotency::RefundIdempotencyStore;
use crate::models::{Amount, RefundRequest, RefundResult, RefundStatus};
use crate::orchestrator::AdapterRegistry;
use crate::persistence::{ReserveOutcome, Store};

pub struct RefundOrchestrator {
    adapters: AdapterRegistry,
    idempotency: Arc<RefundIdempotencyStore>,
    store: Arc<Store>,
}

impl RefundOrchestrator {
    pub fn new(
        adapters: AdapterRegistry,
        idempotency: Arc<RefundIdempotencyStore>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            adapters,
            idempotency,
            store,
        }
    }

    pub async fn execute(&self, request: RefundRequest) -> RefundResult {
        // Step 1: refund idempotency, a namespace distinct from payment
        // keys (spec.md §4.7 step 1).
        if let Some(cached) = self.idempotency.get_cached(&request.idempotency_key).await {
            return cached;
        }

        let result = self.execute_uncached(&request).await;
        self.idempotency.store(&request.idempotency_key, result.clone());
        result
    }

    async fn execute_uncached(&self, request: &RefundRequest) -> RefundResult {
        // Step 2: resolve the original payment.
        let payment = match self.store.find_transaction(&request.payment_idempotency_key) {
            Ok(Some(p)) => p,
            Ok(None) => {
                return self.reject(request, RefundFailureCode::PaymentNotFound, "payment not found")
            }
            Err(err) => {
                tracing::warn!(%err, "failed to resolve original payment");
                return self.reject(request, RefundFailureCode::PaymentNotFound, "payment not found");
            }
        };

        if !payment.status.is_successful() || payment.status == crate::models::PaymentStatus::Reversed {
            return self.reject(
                request,
                RefundFailureCode::PaymentNotRefundable,
                "payment is not in a refundable state",
            );
        }

        // Step 3: resolve the refund amount (explicit, else full payment).
        let amount = request.amount.unwrap_or(payment.amount);

        // Step 4: single-refund bound.
        if amount.minor_units() > payment.amount.minor_units() {
            return self.reject(
                request,
                RefundFailureCode::AmountExceeded,
                "refund amount exceeds the original payment amount",
            );
        }

        // Step 5: cumulative bound, enforced atomically (spec.md §4.7:
        // "a row lock on the payment key, or an equivalent compare-and-set,
        // is required"). Reserves a PENDING row on success. This must run
        // before step 6's adapter resolution — spec.md orders the
        // cumulative-bound check ahead of adapter resolution, so a refund
        // that both exceeds the bound and targets an unresolvable adapter
        // must fail with REFUND_LIMIT_EXCEEDED, not ADAPTER_NOT_FOUND.
        let currency = request
            .currency_code
            .clone()
            .unwrap_or_else(|| payment.currency_code.clone());
        match self.store.reserve_refund(
            &request.idempotency_key,
            &request.payment_idempotency_key,
            amount,
            &currency.0,
            payment.amount,
        ) {
            Ok(ReserveOutcome::Reserved) => {}
            Ok(ReserveOutcome::AlreadyReserved) => {
                // A concurrent duplicate beat us to the reservation; defer
                // to whatever it persists once finalized.
                if let Ok(Some(existing)) = self.store.find_refund(&request.idempotency_key) {
                    return existing;
                }
            }
            Ok(ReserveOutcome::WouldExceedBound { already_refunded }) => {
                let remaining = payment
                    .amount
                    .checked_sub(already_refunded)
                    .unwrap_or(Amount::ZERO);
                return self.reject(
                    request,
                    RefundFailureCode::LimitExceeded,
                    &format!("Already refunded: {already_refunded}, Remaining: {remaining}"),
                );
            }
            Err(err) => {
                tracing::warn!(%err, "failed to reserve cumulative refund bound, rejecting conservatively");
                return self.reject(
                    request,
                    RefundFailureCode::ExecutionFailed,
                    "refund bound check failed",
                );
            }
        }

        // Step 6: adapter resolution — the exact adapter that processed
        // the original charge (spec.md §4.7 step 6). A reservation already
        // exists at this point, so a miss here must finalize that PENDING
        // row to FAILED rather than insert a fresh terminal row.
        let adapter = match payment
            .adapter_name()
            .and_then(|name| self.adapters.get(name))
        {
            Some(adapter) => adapter,
            None => {
                let result = failed(
                    request,
                    RefundFailureCode::AdapterNotFound,
                    "no adapter found for the original payment",
                );
                if let Err(err) = self.store.finalize_refund(&result) {
                    tracing::warn!(%err, idempotency_key = %request.idempotency_key, "failed to finalize reserved refund durably");
                }
                return result;
            }
        };

        // Step 8: invoke the adapter with the resolved, non-null amount.
        let result = match adapter.refund(request, amount).await {
            Ok(Some(mut result)) => {
                result.idempotency_key = request.idempotency_key.clone();
                result.payment_idempotency_key = request.payment_idempotency_key.clone();
                result
            }
            Ok(None) => failed(
                request,
                RefundFailureCode::NotSupported,
                "adapter does not support refunds",
            ),
            Err(err) => failed(
                request,
                RefundFailureCode::ExecutionFailed,
                &format!("adapter refund call failed: {err}"),
            ),
        };

        if let Err(err) = self.store.finalize_refund(&result) {
            tracing::warn!(%err, idempotency_key = %request.idempotency_key, "failed to finalize reserved refund durably");
        }
        result
    }

    /// Persists and returns a refund outcome that was rejected before
    /// reservation — nothing was reserved against the bound, so this is a
    /// plain idempotent insert rather than a finalize.
    fn reject(
        &self,
        request: &RefundRequest,
        code: RefundFailureCode,
        message: &str,
    ) -> RefundResult {
        let result = failed(request, code, message);
        if let Err(err) = self.store.insert_terminal_refund(&result) {
            tracing::warn!(%err, idempotency_key = %request.idempotency_key, "failed to persist rejected refund durably");
        }
        result
    }
}

fn failed(request: &RefundRequest, code: RefundFailureCode, message: &str) -> RefundResult {
    RefundResult {
        idempotency_key: request.idempotency_key.clone(),
        payment_idempotency_key: request.payment_idempotency_key.clone(),
        provider_transaction_id: None,
        status: RefundStatus::Failed,
        amount: request.amount.unwrap_or(Amount::ZERO),
        currency_code: request.currency_code.clone().unwrap_or_else(|| "USD".into()),
        failure_code: Some(code.as_str().to_string()),
        message: Some(message.to_string()),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::mock_stripe;
    use crate::models::{Amount, PaymentRequest, PaymentStatus, ProviderType};
    use std::time::Duration;

    fn setup() -> (RefundOrchestrator, Arc<Store>, Arc<crate::adapter::mock::MockAdapter>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let stripe = Arc::new(mock_stripe());
        let adapters = AdapterRegistry::new(vec![stripe.clone()]);
        let idempotency = Arc::new(RefundIdempotencyStore::new(Duration::from_secs(60), store.clone()));
        (
            RefundOrchestrator::new(adapters, idempotency, store.clone()),
            store,
            stripe,
        )
    }

    fn seed_payment(store: &Store, key: &str, amount: &str) {
        let request = PaymentRequest {
            idempotency_key: key.to_string(),
            provider_type: ProviderType::Card,
            amount: Amount::from_decimal_str(amount).unwrap(),
            currency_code: "USD".into(),
            merchant_reference: "merchant-1".into(),
            customer_id: None,
            email: None,
            client_ip: None,
            correlation_id: None,
            provider_payload: Default::default(),
        };
        let mut result = PaymentResultFixture::success(key, amount);
        result.metadata.insert("adapterName".into(), "mock-stripe".into());
        store.upsert_transaction(&request, &result).unwrap();
    }

    struct PaymentResultFixture;
    impl PaymentResultFixture {
        fn success(key: &str, amount: &str) -> crate::models::PaymentResult {
            crate::models::PaymentResult {
                idempotency_key: key.to_string(),
                provider_transaction_id: Some("ptx1".into()),
                status: PaymentStatus::Success,
                amount: Amount::from_decimal_str(amount).unwrap(),
                currency_code: "USD".into(),
                failure_code: None,
                message: None,
                timestamp: Utc::now(),
                metadata: Default::default(),
                card_identity: Default::default(),
            }
        }
    }

    fn refund_request(refund_key: &str, payment_key: &str, amount: Option<&str>) -> RefundRequest {
        RefundRequest {
            idempotency_key: refund_key.to_string(),
            payment_idempotency_key: payment_key.to_string(),
            amount: amount.map(|a| Amount::from_decimal_str(a).unwrap()),
            currency_code: Some("USD".into()),
            reason: None,
            merchant_reference: None,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn cumulative_refund_bound_is_enforced_across_partial_refunds() {
        let (orch, store, _stripe) = setup();
        seed_payment(&store, "p1", "100.00");

        let r1 = orch.execute(refund_request("r1", "p1", Some("30.00"))).await;
        assert_eq!(r1.status, RefundStatus::Success);

        let r2 = orch.execute(refund_request("r2", "p1", Some("50.00"))).await;
        assert_eq!(r2.status, RefundStatus::Success);

        let r3 = orch.execute(refund_request("r3", "p1", Some("30.00"))).await;
        assert_eq!(r3.status, RefundStatus::Failed);
        assert_eq!(r3.failure_code.as_deref(), Some("REFUND_LIMIT_EXCEEDED"));
        let message = r3.message.unwrap();
        assert!(message.contains("Already refunded: 80.00"));
        assert!(message.contains("Remaining: 20.00"));
    }

    #[tokio::test]
    async fn refund_with_identical_key_is_idempotent() {
        let (orch, store, _stripe) = setup();
        seed_payment(&store, "p2", "50.00");

        let first = orch.execute(refund_request("r-dup", "p2", None)).await;
        let second = orch.execute(refund_request("r-dup", "p2", None)).await;
        assert_eq!(first.provider_transaction_id, second.provider_transaction_id);
    }

    #[tokio::test]
    async fn refund_against_missing_payment_fails_with_not_found() {
        let (orch, _store, _stripe) = setup();
        let result = orch.execute(refund_request("r-x", "missing", None)).await;
        assert_eq!(result.status, RefundStatus::Failed);
        assert_eq!(result.failure_code.as_deref(), Some("PAYMENT_NOT_FOUND"));
    }

    #[tokio::test]
    async fn refund_exceeding_single_payment_amount_fails() {
        let (orch, store, _stripe) = setup();
        seed_payment(&store, "p3", "20.00");
        let result = orch.execute(refund_request("r-y", "p3", Some("25.00"))).await;
        assert_eq!(result.failure_code.as_deref(), Some("REFUND_AMOUNT_EXCEEDED"));
    }

    #[tokio::test]
    async fn cumulative_bound_is_checked_before_adapter_resolution() {
        let (orch, store, _stripe) = setup();
        seed_payment(&store, "p4", "100.00");

        let r1 = orch.execute(refund_request("r-a", "p4", Some("80.00"))).await;
        assert_eq!(r1.status, RefundStatus::Success);

        // Simulate the original adapter no longer resolving (e.g. retired)
        // by rebuilding the orchestrator without it registered.
        let idempotency = Arc::new(RefundIdempotencyStore::new(Duration::from_secs(60), store.clone()));
        let orch_without_adapter = RefundOrchestrator::new(AdapterRegistry::new(vec![]), idempotency, store.clone());

        let r2 = orch_without_adapter
            .execute(refund_request("r-b", "p4", Some("30.00")))
            .await;
        assert_eq!(r2.status, RefundStatus::Failed);
        assert_eq!(r2.failure_code.as_deref(), Some("REFUND_LIMIT_EXCEEDED"));
    }
}
