//! Alert store and webhook dispatch, spec.md §4.10 tail / §6.
//!
//! The in-memory ring buffer mirrors `signals::storage`'s bounded-`VecDeque`
//! ring buffer style in the teacher; durable persistence and webhook
//! subscriptions go through `persistence::Store`. Webhook delivery is
//! grounded in the teacher's callback/notification pattern in
//! `route_quality::mitigation` (`app_callback: Option<Box<dyn Fn(...)>>`),
//! reimplemented here as a real bounded-timeout `reqwest::Client` POST with
//! bounded retries, since the webhook target is a real external collaborator
//! (spec.md §6) rather than an in-process callback.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;

use crate::models::RiskAlert;
use crate::persistence::Store;

const RING_BUFFER_CAPACITY: usize = 1000;
const WEBHOOK_MAX_ATTEMPTS: u32 = 3;
const WEBHOOK_RETRY_WAIT: Duration = Duration::from_millis(200);

/// Owns the in-memory alert ring buffer (spec.md §3 ownership: "the alert
/// store owns the alert ring buffer"), durable persistence, per-entity
/// webhook subscriptions, and their dispatch.
pub struct AlertHub {
    ring: Mutex<VecDeque<RiskAlert>>,
    store: Arc<Store>,
    http: Client,
}

impl AlertHub {
    pub fn new(store: Arc<Store>, webhook_timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(webhook_timeout)
            .build()
            .expect("failed to build webhook HTTP client");

        // Seed the ring buffer from durable storage so `GET /risk/alerts`
        // survives a process restart instead of reading empty until the
        // next alert is published.
        let mut seed = match store.recent_alerts(RING_BUFFER_CAPACITY) {
            Ok(alerts) => alerts,
            Err(err) => {
                tracing::warn!(%err, "failed to seed alert ring buffer from durable storage");
                Vec::new()
            }
        };
        seed.reverse();

        Self {
            ring: Mutex::new(VecDeque::from(seed)),
            store,
            http,
        }
    }

    /// Appends the alert to the ring buffer, persists it durably, and fans
    /// it out to every webhook subscribed to the alert's entity. Durable
    /// persistence and webhook failures are logged, never surfaced
    /// (spec.md §7).
    pub async fn publish(&self, alert: RiskAlert) {
        {
            let mut ring = self.ring.lock();
            if ring.len() >= RING_BUFFER_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(alert.clone());
        }

        if let Err(err) = self.store.insert_alert(&alert) {
            tracing::warn!(alert_id = %alert.alert_id, %err, "failed to persist alert durably");
        }

        tracing::info!(
            alert_id = %alert.alert_id,
            entity_id = %alert.entity_id,
            entity_type = %alert.entity_type,
            level = ?alert.level,
            risk_score = alert.risk_score,
            "risk alert emitted"
        );

        let webhooks = match self.store.list_webhooks(&alert.entity_id) {
            Ok(urls) => urls,
            Err(err) => {
                tracing::warn!(entity_id = %alert.entity_id, %err, "failed to look up webhook subscriptions");
                return;
            }
        };

        for url in webhooks {
            self.dispatch_webhook(url, alert.clone()).await;
        }
    }

    async fn dispatch_webhook(&self, url: String, alert: RiskAlert) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.http.post(&url).json(&alert).send().await {
                Ok(resp) if resp.status().is_success() => return,
                Ok(resp) => {
                    tracing::warn!(url, status = %resp.status(), attempt, "webhook delivery returned non-success status");
                }
                Err(err) => {
                    tracing::warn!(url, %err, attempt, "webhook delivery failed");
                }
            }
            if attempt >= WEBHOOK_MAX_ATTEMPTS {
                tracing::warn!(url, alert_id = %alert.alert_id, "webhook delivery permanently failed, giving up");
                return;
            }
            tokio::time::sleep(WEBHOOK_RETRY_WAIT).await;
        }
    }

    /// `GET /risk/alerts?limit=N`: last N alerts in reverse chronological
    /// order, served from the in-memory ring buffer.
    pub fn recent(&self, limit: usize) -> Vec<RiskAlert> {
        let ring = self.ring.lock();
        ring.iter().rev().take(limit).cloned().collect()
    }

    pub fn subscribe_webhook(&self, entity_id: &str, webhook_url: &str) -> Result<(), crate::error::StoreError> {
        self.store.subscribe_webhook(entity_id, webhook_url)
    }

    pub fn unsubscribe_webhook(&self, entity_id: &str, webhook_url: &str) -> Result<(), crate::error::StoreError> {
        self.store.unsubscribe_webhook(entity_id, webhook_url)
    }

    pub fn list_webhooks(&self, entity_id: &str) -> Result<Vec<String>, crate::error::StoreError> {
        self.store.list_webhooks(entity_id)
    }
}

impl Default for AlertHub {
    fn default() -> Self {
        Self::new(
            Arc::new(Store::open_in_memory().expect("in-memory store should always open")),
            Duration::from_secs(5),
        )
    }
}
