//! Payment orchestrator, spec.md §4.6.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use super::AdapterRegistry;
use crate::breaker::{CircuitBreakerRegistry, CircuitState};
use crate::config::{Config, RetryConfig};
use crate::error::{AdapterError, OrchestratorError};
use crate::events::EventProducer;
use crate::idempotency::PaymentIdempotencyStore;
use crate::metrics::MetricsRegistry;
use crate::models::{EventType, PaymentEvent, PaymentRequest, PaymentResult, PaymentStatus};
use crate::persistence::Store;
use crate::retry;
use crate::routing::RoutingStrategy;

pub struct PaymentOrchestrator {
    adapters: AdapterRegistry,
    idempotency: Arc<PaymentIdempotencyStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: Arc<MetricsRegistry>,
    router: Box<dyn RoutingStrategy>,
    store: Arc<Store>,
    events: EventProducer,
    retry_config: RetryConfig,
    failover_enabled: bool,
    max_attempts: usize,
}

impl PaymentOrchestrator {
    pub fn new(
        config: &Config,
        adapters: AdapterRegistry,
        idempotency: Arc<PaymentIdempotencyStore>,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: Arc<MetricsRegistry>,
        router: Box<dyn RoutingStrategy>,
        store: Arc<Store>,
        events: EventProducer,
    ) -> Self {
        Self {
            adapters,
            idempotency,
            breakers,
            metrics,
            router,
            store,
            events,
            retry_config: config.retry.clone(),
            failover_enabled: config.routing.failover_enabled,
            max_attempts: config.routing.failover_max_attempts,
        }
    }

    pub async fn execute(&self, request: PaymentRequest) -> Result<PaymentResult, OrchestratorError> {
        validate(&request)?;

        // Step 1: idempotency check (spec.md §4.6 step 1).
        if let Some(cached) = self.idempotency.get_cached(&request.idempotency_key).await {
            if cached.is_well_formed() {
                return Ok(cached);
            }
            tracing::warn!(
                idempotency_key = %request.idempotency_key,
                "prior result failed well-formedness check, treating as miss"
            );
        }

        self.publish_requested(&request);

        let mut attempted: Vec<String> = Vec::new();
        let max_attempts = if self.failover_enabled { self.max_attempts } else { 1 };

        for _ in 0..max_attempts {
            let candidates = self
                .adapters
                .candidates(request.provider_type, &attempted)
                .into_iter()
                .filter(|c| self.breakers.state_of(&c.adapter_name) != CircuitState::Open)
                .collect::<Vec<_>>();

            let selected_name = self.select_adapter(&request, &candidates);
            let Some(adapter_name) = selected_name else {
                break;
            };

            // Step 2c: pre-call durable check — closes the race between
            // two concurrent requests that both missed the hot cache.
            match self.store.find_transaction(&request.idempotency_key) {
                Ok(Some(existing)) if existing.is_well_formed() => return Ok(existing),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(%err, "pre-call durable lookup failed, treating as miss");
                }
            }

            let Some(adapter) = self.adapters.get(&adapter_name) else {
                attempted.push(adapter_name);
                continue;
            };

            if let Err(_not_permitted) = self.breakers.check(&adapter_name) {
                // spec.md §9 open question: an open-breaker short-circuit
                // counts as a failure metric but does not re-enter the
                // breaker's own window (it would never let the breaker
                // half-open otherwise).
                self.metrics.record_call_not_permitted(&adapter_name);
                tracing::info!(adapter_name, "breaker open, failing over without calling adapter");
                attempted.push(adapter_name);
                continue;
            }

            attempted.push(adapter_name.clone());
            self.metrics.call_started(&adapter_name);
            let started_at = Instant::now();

            let outcome = retry::retry(&self.retry_config, || adapter.execute(&request)).await;
            let latency_ms = started_at.elapsed().as_millis() as u64;

            match outcome {
                Ok(mut result) => {
                    self.breakers.record_success(&adapter_name);
                    self.metrics.call_finished(&adapter_name, true, latency_ms, 0);

                    result
                        .metadata
                        .insert("adapterName".to_string(), adapter_name.clone());
                    result
                        .metadata
                        .insert("providerType".to_string(), request.provider_type.to_string());

                    self.idempotency.store(&request.idempotency_key, result.clone());
                    if let Err(err) = self.store.upsert_transaction(&request, &result) {
                        tracing::warn!(%err, idempotency_key = %request.idempotency_key, "failed to persist transaction, hot cache still protects idempotency");
                    }
                    self.publish_outcome(&request, &result);
                    return Ok(result);
                }
                Err(AdapterError::Declined { code, message }) => {
                    // Permanent decline: the adapter is healthy, it just
                    // refused the charge. Terminal — not a failover
                    // trigger (spec.md §7).
                    self.breakers.record_success(&adapter_name);
                    self.metrics.call_finished(&adapter_name, true, latency_ms, 0);

                    let mut result = declined_result(&request, &code, &message);
                    result
                        .metadata
                        .insert("adapterName".to_string(), adapter_name.clone());
                    result
                        .metadata
                        .insert("providerType".to_string(), request.provider_type.to_string());

                    self.idempotency.store(&request.idempotency_key, result.clone());
                    if let Err(err) = self.store.upsert_transaction(&request, &result) {
                        tracing::warn!(%err, idempotency_key = %request.idempotency_key, "failed to persist declined transaction");
                    }
                    self.publish_outcome(&request, &result);
                    return Ok(result);
                }
                Err(err) => {
                    self.breakers.record_failure(&adapter_name);
                    self.metrics.call_finished(&adapter_name, false, latency_ms, 0);
                    tracing::warn!(adapter_name, %err, "adapter call failed, attempting failover");
                }
            }
        }

        let attempts = attempted.len();
        Err(OrchestratorError::NoPspAvailable { attempts })
    }

    /// Honors the `testAdapterName` override hook (spec.md §9) when it
    /// names a candidate that's actually in the healthy set; otherwise
    /// defers to the configured routing strategy.
    fn select_adapter(
        &self,
        request: &PaymentRequest,
        candidates: &[crate::routing::RoutingCandidate],
    ) -> Option<String> {
        if let Some(test_name) = request.test_adapter_name() {
            if candidates.iter().any(|c| c.adapter_name == test_name) {
                return Some(test_name.to_string());
            }
        }
        self.router.select(candidates, &self.metrics)
    }

    fn publish_requested(&self, request: &PaymentRequest) {
        self.events.publish(PaymentEvent {
            event_id: Uuid::new_v4().to_string(),
            idempotency_key: request.idempotency_key.clone(),
            correlation_id: request.correlation_id.clone(),
            provider_type: request.provider_type,
            provider_transaction_id: None,
            status: PaymentStatus::Pending,
            amount: request.amount,
            currency_code: request.currency_code.clone(),
            failure_code: None,
            message: None,
            merchant_reference: request.merchant_reference.clone(),
            customer_id: request.customer_id.clone(),
            email: request.email.clone(),
            client_ip: request.client_ip.clone(),
            card_identity: Default::default(),
            timestamp: Utc::now(),
            event_type: EventType::PaymentRequested,
        });
    }

    fn publish_outcome(&self, request: &PaymentRequest, result: &PaymentResult) {
        let event_type = if result.status.is_failure() {
            EventType::PaymentFailed
        } else {
            EventType::PaymentCompleted
        };
        self.events.publish(PaymentEvent {
            event_id: Uuid::new_v4().to_string(),
            idempotency_key: request.idempotency_key.clone(),
            correlation_id: request.correlation_id.clone(),
            provider_type: request.provider_type,
            provider_transaction_id: result.provider_transaction_id.clone(),
            status: result.status,
            amount: result.amount,
            currency_code: result.currency_code.clone(),
            failure_code: result.failure_code.clone(),
            message: result.message.clone(),
            merchant_reference: request.merchant_reference.clone(),
            customer_id: request.customer_id.clone(),
            email: request.email.clone(),
            client_ip: request.client_ip.clone(),
            card_identity: result.card_identity.clone(),
            timestamp: result.timestamp,
            event_type,
        });
    }
}

fn declined_result(request: &PaymentRequest, code: &str, message: &str) -> PaymentResult {
    PaymentResult {
        idempotency_key: request.idempotency_key.clone(),
        provider_transaction_id: None,
        status: PaymentStatus::Failed,
        amount: request.amount,
        currency_code: request.currency_code.clone(),
        failure_code: Some(code.to_string()),
        message: Some(message.to_string()),
        timestamp: Utc::now(),
        metadata: Default::default(),
        card_identity: Default::default(),
    }
}

fn validate(request: &PaymentRequest) -> Result<(), OrchestratorError> {
    let mut errors = std::collections::HashMap::new();
    if request.idempotency_key.trim().is_empty() {
        errors.insert("idempotencyKey".to_string(), "must not be empty".to_string());
    }
    if !request.amount.is_positive() {
        errors.insert("amount".to_string(), "must be a positive amount".to_string());
    }
    if request.currency_code.0.trim().is_empty() {
        errors.insert("currencyCode".to_string(), "must not be empty".to_string());
    }
    if request.merchant_reference.trim().is_empty() {
        errors.insert(
            "merchantReference".to_string(),
            "must not be empty".to_string(),
        );
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::{mock_adyen, mock_stripe};
    use crate::breaker::CircuitBreakerRegistry;
    use crate::config::{BreakerConfig, Config, RoutingConfig, RoutingStrategyKind};
    use crate::idempotency::PaymentIdempotencyStore;
    use crate::models::{Amount, ProviderType};
    use crate::persistence::Store;
    use crate::routing;
    use std::time::Duration;

    fn request(key: &str) -> PaymentRequest {
        PaymentRequest {
            idempotency_key: key.to_string(),
            provider_type: ProviderType::Card,
            amount: Amount::from_decimal_str("100.00").unwrap(),
            currency_code: "USD".into(),
            merchant_reference: "merchant-1".into(),
            customer_id: None,
            email: None,
            client_ip: None,
            correlation_id: None,
            provider_payload: Default::default(),
        }
    }

    fn orchestrator(
        store: Arc<Store>,
        stripe: Arc<crate::adapter::mock::MockAdapter>,
        adyen: Arc<crate::adapter::mock::MockAdapter>,
    ) -> PaymentOrchestrator {
        let adapters = super::super::AdapterRegistry::new(vec![stripe, adyen]);
        let idempotency = Arc::new(PaymentIdempotencyStore::new(
            Duration::from_secs(60),
            store.clone(),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
            window_size: 10,
            min_calls: 4,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_secs(30),
            half_open_successes_to_close: 2,
        }));
        let metrics = Arc::new(MetricsRegistry::new());
        let router = routing::build(RoutingStrategyKind::Hybrid);
        let (events, _rx) = EventProducer::new(store.clone());

        let mut config = Config::from_env().unwrap_or_else(|_| panic!("config"));
        config.routing = RoutingConfig {
            strategy: RoutingStrategyKind::Hybrid,
            failover_enabled: true,
            failover_max_attempts: 3,
        };

        PaymentOrchestrator::new(
            &config, adapters, idempotency, breakers, metrics, router, store, events,
        )
    }

    #[tokio::test]
    async fn duplicate_submission_returns_first_outcome_exactly_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let stripe = Arc::new(mock_stripe());
        let adyen = Arc::new(mock_adyen());
        let orch = orchestrator(store, stripe.clone(), adyen);

        let req = request("k1");
        let first = orch.execute(req.clone()).await.unwrap();
        let second = orch.execute(req).await.unwrap();

        assert!(first.semantically_eq(&second));
        assert_eq!(first.status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn failover_to_second_adapter_when_first_breaker_opens() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let stripe = Arc::new(mock_stripe());
        let adyen = Arc::new(mock_adyen());
        stripe.inject_transient_failures(100);
        let orch = orchestrator(store, stripe, adyen);

        for i in 0..4 {
            let req = request(&format!("warmup-{i}"));
            let _ = orch.execute(req).await;
        }

        let req = request("k2");
        let result = orch.execute(req).await.unwrap();
        assert_eq!(result.status, PaymentStatus::Success);
        assert_eq!(result.adapter_name(), Some("mock-adyen"));
    }

    #[tokio::test]
    async fn exhausts_to_no_psp_available_when_all_adapters_fail() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let stripe = Arc::new(mock_stripe());
        let adyen = Arc::new(mock_adyen());
        stripe.inject_transient_failures(100);
        adyen.inject_transient_failures(100);
        let orch = orchestrator(store, stripe, adyen);

        let req = request("k3");
        let err = orch.execute(req).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoPspAvailable { .. }));
    }

    #[tokio::test]
    async fn validation_error_short_circuits_before_any_adapter_call() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let stripe = Arc::new(mock_stripe());
        let adyen = Arc::new(mock_adyen());
        let orch = orchestrator(store, stripe, adyen);

        let mut req = request("k4");
        req.amount = Amount::ZERO;
        let err = orch.execute(req).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }
}
