//! Payment event log: producer/consumer over an in-process broadcast
//! channel backed by a durable table, spec.md §4.8.
//!
//! Grounded in the teacher's `broadcast::Sender<WsServerEvent>` fan-out in
//! `main.rs` (one sender, N subscribed receivers, each running its own
//! `recv()` loop). The broadcast channel is lossy under backpressure by
//! design — spec.md is explicit that losing an in-memory event must not
//! compromise payment correctness, only risk-detection latency — so the
//! durable `payment_events` table is the source of truth for replay, and
//! the broadcast channel is only the low-latency notification path.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::models::PaymentEvent;
use crate::persistence::Store;
use crate::risk::RiskEngine;

const CHANNEL_CAPACITY: usize = 4096;

/// Publishes `PaymentEvent`s. Held by the orchestrators; never blocks the
/// request path on delivery confirmation (spec.md §4.8).
#[derive(Clone)]
pub struct EventProducer {
    sender: broadcast::Sender<PaymentEvent>,
    store: Arc<Store>,
}

impl EventProducer {
    pub fn new(store: Arc<Store>) -> (Self, broadcast::Receiver<PaymentEvent>) {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        (Self { sender, store }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.sender.subscribe()
    }

    /// Persists the event durably (best-effort; failure is logged and
    /// does not propagate, per spec.md §7) then fans it out over the
    /// broadcast channel. A lagging/absent consumer is not an error here.
    pub fn publish(&self, event: PaymentEvent) {
        if let Err(err) = self.store.insert_event(&event) {
            tracing::warn!(
                event_id = %event.event_id,
                idempotency_key = %event.idempotency_key,
                %err,
                "failed to persist payment event durably"
            );
        }
        let _ = self.sender.send(event);
    }
}

/// Drains one subscription into the risk pipeline: aggregator, scoring
/// engine, and (on alert) the alert store. Consumer-side idempotency is by
/// `eventId` (spec.md §4.8, invariant I5), implemented against the durable
/// `processed_events` table so dedup survives process restart.
pub struct EventConsumer {
    receiver: broadcast::Receiver<PaymentEvent>,
    store: Arc<Store>,
    risk_engine: Arc<RiskEngine>,
    alerts: Arc<crate::alerts::AlertHub>,
}

impl EventConsumer {
    pub fn new(
        receiver: broadcast::Receiver<PaymentEvent>,
        store: Arc<Store>,
        risk_engine: Arc<RiskEngine>,
        alerts: Arc<crate::alerts::AlertHub>,
    ) -> Self {
        Self {
            receiver,
            store,
            risk_engine,
            alerts,
        }
    }

    /// Runs until the producer side is dropped. Intended to be spawned as
    /// a background task per worker (spec.md §5: "a pool of N consumer
    /// workers").
    pub async fn run(mut self) {
        loop {
            match self.receiver.recv().await {
                Ok(event) => self.handle(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event consumer lagged, some events were dropped from the in-memory channel");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event producer closed, consumer shutting down");
                    return;
                }
            }
        }
    }

    async fn handle(&self, event: PaymentEvent) {
        let is_new = match self.store.mark_event_processed_if_new(&event.event_id) {
            Ok(is_new) => is_new,
            Err(err) => {
                tracing::warn!(event_id = %event.event_id, %err, "dedup check failed, processing event anyway");
                true
            }
        };
        if !is_new {
            return;
        }

        let Some(outcome) = self.risk_engine.process(&event).await else {
            return;
        };

        if let Some(alert) = outcome.alert {
            self.alerts.publish(alert).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::models::{Amount, CardIdentity, EventType, PaymentStatus, ProviderType};
    use chrono::Utc;
    use std::time::Duration;

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
            amount: Amount::from_decimal_str("100.00").unwrap(),
            currency_code: "USD".into(),
            failure_code: None,
            message: None,
            merchant_reference: merchant.to_string(),
            customer_id: None,
            email: None,
            client_ip: None,
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
    async fn duplicate_event_id_is_processed_once() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mut config = RiskConfig::default();
        config.alert_score_threshold = 0.3;
        let risk_engine = Arc::new(RiskEngine::new(config));
        let alerts = Arc::new(crate::alerts::AlertHub::new(store.clone(), Default::default()));

        let (producer, receiver) = EventProducer::new(store.clone());
        let consumer = EventConsumer::new(receiver, store.clone(), risk_engine, alerts);
        let handle = tokio::spawn(consumer.run());

        let e = event("m1", true);
        producer.publish(e.clone());
        producer.publish(e.clone());
        producer.publish(event("m1", true));
        producer.publish(event("m1", true));

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(producer);
        let _ = handle.await;

        assert!(store.mark_event_processed_if_new(&e.event_id).is_ok());
    }
}
