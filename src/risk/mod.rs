//! Real-time risk scoring engine, spec.md §4.9–§4.10.
//!
//! Wires the window aggregator, the rule-scoring taxonomy, and the optional
//! ML merchant-score override into one entry point a payment event passes
//! through on its way out of the orchestrator, the way the teacher's
//! `risk::RiskEngine` wires `KellyCalculator` + `SignalDetector` together.

mod aggregator;
mod model_client;
mod scoring;

pub use aggregator::WindowAggregator;
pub use model_client::ModelClient;
pub use scoring::ScoringOutcome;

use crate::config::RiskConfig;
use crate::models::{EntityType, PaymentEvent};

pub struct RiskEngine {
    aggregator: WindowAggregator,
    model_client: Option<ModelClient>,
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        let model_client = if config.ml_enabled {
            config
                .ml_service_url
                .clone()
                .map(|url| ModelClient::new(url, config.ml_timeout_ms))
        } else {
            None
        };

        Self {
            aggregator: WindowAggregator::new(),
            model_client,
            config,
        }
    }

    /// Records the event into every applicable window, optionally consults
    /// the ML service for a MERCHANT-dimension override, and scores the
    /// result. Returns `None` entirely when the engine is disabled.
    pub async fn process(&self, event: &PaymentEvent) -> Option<ScoringOutcome> {
        if !self.config.engine_enabled {
            return None;
        }

        let features_by_dimension = self.aggregator.record(event);

        let ml_merchant_score = if let Some(client) = &self.model_client {
            let merchant_features = features_by_dimension
                .iter()
                .find(|f| f.entity_type == EntityType::Merchant);
            match merchant_features {
                Some(features) => client.score_merchant(features).await,
                None => None,
            }
        } else {
            None
        };

        Some(scoring::score_event(
            &features_by_dimension,
            event.amount.as_f64(),
            &event.event_id,
            ml_merchant_score,
            &self.config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amount, CardIdentity, EventType, PaymentStatus, ProviderType};
    use chrono::Utc;

    fn event(merchant: &str, failed: bool) -> PaymentEvent {
        PaymentEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            provider_type: ProviderType::Card,
            provider_transaction_id: None,
            status: if failed {
                PaymentStatus::Failed
            } else {
                PaymentStatus::Success
            },
            amount: Amount::from_decimal_str("10.00").unwrap(),
            currency_code: "USD".into(),
            failure_code: None,
            message: None,
            merchant_reference: merchant.to_string(),
            customer_id: None,
            email: Some("shopper@example.com".into()),
            client_ip: Some("10.0.0.1".into()),
            card_identity: CardIdentity::default(),
            timestamp: Utc::now(),
            event_type: if failed {
                EventType::PaymentFailed
            } else {
                EventType::PaymentCompleted
            },
        }
    }

    #[tokio::test]
    async fn disabled_engine_returns_none() {
        let mut config = RiskConfig::default();
        config.engine_enabled = false;
        let engine = RiskEngine::new(config);
        assert!(engine.process(&event("m1", false)).await.is_none());
    }

    #[tokio::test]
    async fn repeated_failures_on_one_merchant_trigger_an_alert() {
        let mut config = RiskConfig::default();
        config.alert_score_threshold = 0.3;
        let engine = RiskEngine::new(config);

        engine.process(&event("m1", true)).await;
        engine.process(&event("m1", true)).await;
        let outcome = engine.process(&event("m1", true)).await.unwrap();

        assert!(outcome.alert.is_some());
    }
}
