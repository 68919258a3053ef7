//! Payment orchestration & risk detection platform — composition root.
//!
//! Wires every singleton service (adapters, breaker/metrics/idempotency
//! registries, the event log, the risk engine, the alert hub) once at
//! startup and serves the HTTP surface over axum, the same shape as the
//! teacher's `main.rs` `AppState`-over-`Arc` composition.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payorch_backend::adapter::mock::{mock_adyen, mock_bank_transfer, mock_bnpl, mock_stripe, mock_wallet};
use payorch_backend::adapter::PaymentAdapter;
use payorch_backend::alerts::AlertHub;
use payorch_backend::api::{router, AppState};
use payorch_backend::breaker::CircuitBreakerRegistry;
use payorch_backend::config::{Cli, Config};
use payorch_backend::events::{EventConsumer, EventProducer};
use payorch_backend::idempotency::{PaymentIdempotencyStore, RefundIdempotencyStore};
use payorch_backend::metrics::MetricsRegistry;
use payorch_backend::middleware::rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
use payorch_backend::orchestrator::{AdapterRegistry, PaymentOrchestrator, RefundOrchestrator};
use payorch_backend::persistence::Store;
use payorch_backend::risk::RiskEngine;
use payorch_backend::routing;
use payorch_backend::velocity::VelocitySampler;

use clap::Parser;

const CONSUMER_WORKER_COUNT: usize = 2;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut config = Config::from_env()?;
    Cli::parse().apply(&mut config);

    let store = Arc::new(Store::open(&config.database_path)?);

    let adapters: Vec<Arc<dyn PaymentAdapter>> = vec![
        Arc::new(mock_stripe()),
        Arc::new(mock_adyen()),
        Arc::new(mock_wallet()),
        Arc::new(mock_bnpl()),
        Arc::new(mock_bank_transfer()),
    ];
    let adapter_registry = AdapterRegistry::new(adapters.clone());
    let refund_adapter_registry = AdapterRegistry::new(adapters);

    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
    let metrics = Arc::new(MetricsRegistry::new());
    let router_strategy = routing::build(config.routing.strategy);

    let payment_idempotency = Arc::new(PaymentIdempotencyStore::new(
        config.idempotency_ttl,
        store.clone(),
    ));
    let refund_idempotency = Arc::new(RefundIdempotencyStore::new(
        config.idempotency_ttl,
        store.clone(),
    ));

    let (event_producer, first_receiver) = EventProducer::new(store.clone());

    let payments = Arc::new(PaymentOrchestrator::new(
        &config,
        adapter_registry,
        payment_idempotency.clone(),
        breakers,
        metrics,
        router_strategy,
        store.clone(),
        event_producer.clone(),
    ));
    let refunds = Arc::new(RefundOrchestrator::new(
        refund_adapter_registry,
        refund_idempotency,
        store.clone(),
    ));

    let alerts = Arc::new(AlertHub::new(store.clone(), config.webhook_timeout));
    let risk_engine = Arc::new(RiskEngine::new(config.risk.clone()));

    // Consumer-group size is the concurrency model's §5 "pool of N
    // consumer workers"; every worker subscribes independently and
    // dedups against the same durable `processed_events` ledger.
    let consumer = EventConsumer::new(first_receiver, store.clone(), risk_engine.clone(), alerts.clone());
    tokio::spawn(consumer.run());
    for _ in 1..CONSUMER_WORKER_COUNT {
        let consumer = EventConsumer::new(
            event_producer.subscribe(),
            store.clone(),
            risk_engine.clone(),
            alerts.clone(),
        );
        tokio::spawn(consumer.run());
    }

    let velocity = Arc::new(VelocitySampler::new(&config.velocity));

    let state = AppState {
        payments,
        refunds,
        alerts,
        velocity,
    };

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());
    {
        let rate_limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                rate_limiter.cleanup();
            }
        });
    }

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn(
            payorch_backend::middleware::request_logging,
        ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "payorch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payorch_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
