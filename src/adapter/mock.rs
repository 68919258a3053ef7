//! Mock PSP adapters used for local testing and the test suite.
//!
//! Each adapter carries an injectable failure mode, grounded in the
//! teacher's `DataSourceKillSwitch` (consecutive-failure counter with an
//! explicit trip/reset toggle in `main.rs`) — here reshaped into a
//! deterministic test hook rather than a live kill-switch, since these
//! adapters exist to make orchestrator behavior reproducible under test.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::PaymentAdapter;
use crate::error::AdapterError;
use crate::models::{
    Amount, CardIdentity, PaymentRequest, PaymentResult, PaymentStatus, ProviderType,
    RefundRequest, RefundResult, RefundStatus,
};

pub struct MockAdapter {
    adapter_name: String,
    provider_type: ProviderType,
    supports_refund: bool,
    simulated_latency: Duration,
    /// Decremented on every `execute` call; while > 0, the call fails with
    /// a transient `AdapterError` instead of returning a result. Used to
    /// drive a circuit breaker open deterministically in tests.
    transient_failures_remaining: AtomicU32,
    /// When true, `execute` returns `Ok(PaymentResult { status: Failed })`
    /// (a permanent decline) instead of a success.
    always_decline: AtomicBool,
    healthy: AtomicBool,
}

impl MockAdapter {
    pub fn new(adapter_name: impl Into<String>, provider_type: ProviderType, supports_refund: bool) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            provider_type,
            supports_refund,
            simulated_latency: Duration::from_millis(5),
            transient_failures_remaining: AtomicU32::new(0),
            always_decline: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
        }
    }

    /// Test hook: the next `n` calls to `execute` fail transiently.
    pub fn inject_transient_failures(&self, n: u32) {
        self.transient_failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn set_always_decline(&self, decline: bool) {
        self.always_decline.store(decline, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentAdapter for MockAdapter {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn execute(&self, request: &PaymentRequest) -> Result<PaymentResult, AdapterError> {
        if !self.simulated_latency.is_zero() {
            tokio::time::sleep(self.simulated_latency).await;
        }

        if self.transient_failures_remaining.load(Ordering::SeqCst) > 0 {
            self.transient_failures_remaining
                .fetch_sub(1, Ordering::SeqCst);
            return Err(AdapterError::Transient(format!(
                "{} unreachable",
                self.adapter_name
            )));
        }

        if self.always_decline.load(Ordering::SeqCst) {
            return Ok(PaymentResult {
                idempotency_key: request.idempotency_key.clone(),
                provider_transaction_id: None,
                status: PaymentStatus::Failed,
                amount: request.amount,
                currency_code: request.currency_code.clone(),
                failure_code: Some("CARD_DECLINED".to_string()),
                message: Some("adapter declined the charge".to_string()),
                timestamp: Utc::now(),
                metadata: Default::default(),
                card_identity: CardIdentity::default(),
            });
        }

        Ok(PaymentResult {
            idempotency_key: request.idempotency_key.clone(),
            provider_transaction_id: Some(format!("ptx_{}", uuid::Uuid::new_v4())),
            status: PaymentStatus::Success,
            amount: request.amount,
            currency_code: request.currency_code.clone(),
            failure_code: None,
            message: None,
            timestamp: Utc::now(),
            metadata: Default::default(),
            card_identity: CardIdentity::default(),
        })
    }

    async fn refund(
        &self,
        request: &RefundRequest,
        amount: Amount,
    ) -> Result<Option<RefundResult>, AdapterError> {
        if !self.supports_refund {
            return Ok(None);
        }

        if !self.simulated_latency.is_zero() {
            tokio::time::sleep(self.simulated_latency).await;
        }

        if self.transient_failures_remaining.load(Ordering::SeqCst) > 0 {
            self.transient_failures_remaining
                .fetch_sub(1, Ordering::SeqCst);
            return Err(AdapterError::Transient(format!(
                "{} unreachable",
                self.adapter_name
            )));
        }

        Ok(Some(RefundResult {
            idempotency_key: request.idempotency_key.clone(),
            payment_idempotency_key: request.payment_idempotency_key.clone(),
            provider_transaction_id: Some(format!("prf_{}", uuid::Uuid::new_v4())),
            status: RefundStatus::Success,
            amount,
            currency_code: request
                .currency_code
                .clone()
                .unwrap_or_else(|| "USD".into()),
            failure_code: None,
            message: None,
            timestamp: Utc::now(),
        }))
    }
}

pub fn mock_stripe() -> MockAdapter {
    MockAdapter::new("mock-stripe", ProviderType::Card, true)
}

pub fn mock_adyen() -> MockAdapter {
    MockAdapter::new("mock-adyen", ProviderType::Card, true)
}

pub fn mock_wallet() -> MockAdapter {
    MockAdapter::new("mock-wallet", ProviderType::Wallet, true)
}

pub fn mock_bnpl() -> MockAdapter {
    MockAdapter::new("mock-bnpl", ProviderType::Bnpl, false)
}

pub fn mock_bank_transfer() -> MockAdapter {
    MockAdapter::new("mock-bank-transfer", ProviderType::BankTransfer, true)
}
