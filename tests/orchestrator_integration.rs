//! End-to-end across the orchestrator/event-log/risk-engine boundary.
//!
//! The module-level test suites exercise each component against a direct
//! collaborator (e.g. `PaymentOrchestrator` against its `AdapterRegistry`
//! and `Store`); these tests instead wire the full chain a request
//! actually travels: orchestrator execute -> event publish -> consumer ->
//! window aggregator -> scoring -> alert hub, the same shape `main.rs`
//! assembles at startup.

use std::sync::Arc;
use std::time::Duration;

use payorch_backend::adapter::mock::{mock_adyen, mock_stripe};
use payorch_backend::alerts::AlertHub;
use payorch_backend::breaker::CircuitBreakerRegistry;
use payorch_backend::config::{BreakerConfig, Config, RetryConfig, RiskConfig, RoutingConfig, RoutingStrategyKind};
use payorch_backend::events::{EventConsumer, EventProducer};
use payorch_backend::idempotency::PaymentIdempotencyStore;
use payorch_backend::metrics::MetricsRegistry;
use payorch_backend::models::{Amount, ProviderType, PaymentRequest, PaymentStatus, SignalType};
use payorch_backend::orchestrator::{AdapterRegistry, PaymentOrchestrator};
use payorch_backend::persistence::Store;
use payorch_backend::risk::RiskEngine;
use payorch_backend::routing;

fn request(key: &str, merchant: &str) -> PaymentRequest {
    PaymentRequest {
        idempotency_key: key.to_string(),
        provider_type: ProviderType::Card,
        amount: Amount::from_decimal_str("100.00").unwrap(),
        currency_code: "USD".into(),
        merchant_reference: merchant.to_string(),
        customer_id: None,
        email: None,
        client_ip: None,
        correlation_id: None,
        provider_payload: Default::default(),
    }
}

fn test_config() -> Config {
    let mut config = Config::from_env().unwrap();
    config.routing = RoutingConfig {
        strategy: RoutingStrategyKind::Hybrid,
        failover_enabled: true,
        failover_max_attempts: 3,
    };
    config.retry = RetryConfig {
        max_attempts: 1,
        wait_duration: Duration::from_millis(1),
    };
    config
}

/// spec.md §8 scenario 4, driven through the full pipeline rather than
/// directly against `RiskEngine`: four declined payments for one merchant
/// followed by a success must surface a HIGH_FAILURE_RATE alert in the
/// alert hub's ring buffer.
#[tokio::test]
async fn repeated_declines_surface_a_high_failure_rate_alert_end_to_end() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let stripe = Arc::new(mock_stripe());
    let adapters = AdapterRegistry::new(vec![stripe.clone()]);

    let idempotency = Arc::new(PaymentIdempotencyStore::new(Duration::from_secs(60), store.clone()));
    let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
        window_size: 20,
        min_calls: 20,
        failure_rate_threshold: 0.9,
        open_duration: Duration::from_secs(30),
        half_open_successes_to_close: 2,
    }));
    let metrics = Arc::new(MetricsRegistry::new());
    let router = routing::build(RoutingStrategyKind::Hybrid);
    let (events, first_receiver) = EventProducer::new(store.clone());
    let config = test_config();

    let orchestrator = PaymentOrchestrator::new(
        &config, adapters, idempotency, breakers, metrics, router, store.clone(), events,
    );

    let mut risk_config = RiskConfig::default();
    risk_config.alert_score_threshold = 0.3;
    let risk_engine = Arc::new(RiskEngine::new(risk_config));
    let alerts = Arc::new(AlertHub::new(store.clone(), Duration::from_millis(100)));

    let consumer = EventConsumer::new(first_receiver, store.clone(), risk_engine, alerts.clone());
    tokio::spawn(consumer.run());

    stripe.set_always_decline(true);
    for i in 0..4 {
        let result = orchestrator.execute(request(&format!("d{i}"), "m-declines")).await.unwrap();
        assert_eq!(result.status, PaymentStatus::Failed);
    }
    stripe.set_always_decline(false);
    let result = orchestrator.execute(request("d-success", "m-declines")).await.unwrap();
    assert_eq!(result.status, PaymentStatus::Success);

    tokio::time::sleep(Duration::from_millis(100)).await;

    let recent = alerts.recent(10);
    let alert = recent
        .iter()
        .find(|a| a.entity_id == "m-declines")
        .expect("a high failure rate alert for m-declines");
    assert!(alert.signal_types.contains(&SignalType::HighFailureRate));
    assert!(alert.risk_score >= 0.6);
}

/// spec.md §8 scenario 2, at the cross-module level: opening one CARD
/// adapter's breaker must not prevent a second CARD adapter from serving
/// the same merchant, and the failed-over request's event still reaches
/// the risk pipeline (it is not swallowed by the failover itself).
#[tokio::test]
async fn failover_does_not_starve_the_event_log() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let stripe = Arc::new(mock_stripe());
    let adyen = Arc::new(mock_adyen());
    stripe.inject_transient_failures(100);
    let adapters = AdapterRegistry::new(vec![stripe, adyen]);

    let idempotency = Arc::new(PaymentIdempotencyStore::new(Duration::from_secs(60), store.clone()));
    let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
        window_size: 10,
        min_calls: 4,
        failure_rate_threshold: 0.5,
        open_duration: Duration::from_secs(30),
        half_open_successes_to_close: 2,
    }));
    let metrics = Arc::new(MetricsRegistry::new());
    let router = routing::build(RoutingStrategyKind::Hybrid);
    let (events, first_receiver) = EventProducer::new(store.clone());
    let config = test_config();

    // A second subscription taken before the orchestrator consumes `events`
    // by move, purely to count what actually crossed the broadcast channel.
    let mut observer = events.subscribe();

    let orchestrator = PaymentOrchestrator::new(
        &config, adapters, idempotency, breakers, metrics, router, store.clone(), events,
    );

    let risk_engine = Arc::new(RiskEngine::new(RiskConfig::default()));
    let alerts = Arc::new(AlertHub::new(store.clone(), Duration::from_millis(100)));
    let consumer = EventConsumer::new(first_receiver, store.clone(), risk_engine, alerts);
    tokio::spawn(consumer.run());

    let result = orchestrator.execute(request("f1", "m-failover")).await.unwrap();
    assert_eq!(result.status, PaymentStatus::Success);
    assert_eq!(result.adapter_name(), Some("mock-adyen"));

    let mut seen = 0;
    while let Ok(event) = observer.try_recv() {
        assert_eq!(event.idempotency_key, "f1");
        seen += 1;
    }
    assert_eq!(seen, 2, "expected both a PAYMENT_REQUESTED and PAYMENT_COMPLETED event, got {seen}");
}
