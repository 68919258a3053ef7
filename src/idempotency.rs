//! Two-tier idempotency cache, spec.md §4.2.
//!
//! The hot tier is a sweep-on-access TTL map, the same shape as the
//! teacher's `middleware::rate_limit::{RateLimitLayer, RateLimitEntry}`
//! (one mutex guarding a map of per-key state, window/TTL checked against
//! `Instant::now()` on each access). The durable tier is a trait seam so
//! this module doesn't depend on the persistence layer's concrete type;
//! `persistence` implements it over the `transactions`/`refunds` tables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::models::{PaymentResult, RefundResult};

#[async_trait]
pub trait DurablePaymentLookup: Send + Sync {
    async fn find_payment_result(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<PaymentResult>, StoreError>;
}

#[async_trait]
pub trait DurableRefundLookup: Send + Sync {
    async fn find_refund_result(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<RefundResult>, StoreError>;
}

struct HotEntry<T> {
    value: T,
    inserted_at: Instant,
}

/// Generic hot cache over a single value type, reused for both payments and
/// refunds rather than duplicating the sweep-on-access logic.
struct HotCache<T: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, HotEntry<T>>>,
}

impl<T: Clone> HotCache<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
            entries.remove(key);
        }
        None
    }

    fn put(&self, key: String, value: T) {
        let mut entries = self.entries.lock();
        entries.insert(
            key,
            HotEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Periodic sweep of expired entries, mirroring the teacher's
    /// `RateLimitLayer::cleanup`.
    fn sweep(&self) {
        let mut entries = self.entries.lock();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
    }
}

/// Payment-side idempotency cache. Reads fail open: a durable-tier error is
/// logged and treated as a cache miss rather than surfaced to the caller
/// (spec.md §4.2), since re-running an adapter call is safer than stalling
/// the request on a storage hiccup.
pub struct PaymentIdempotencyStore {
    hot: HotCache<PaymentResult>,
    durable: Arc<dyn DurablePaymentLookup>,
}

impl PaymentIdempotencyStore {
    pub fn new(ttl: Duration, durable: Arc<dyn DurablePaymentLookup>) -> Self {
        Self {
            hot: HotCache::new(ttl),
            durable,
        }
    }

    pub async fn get_cached(&self, idempotency_key: &str) -> Option<PaymentResult> {
        if let Some(hit) = self.hot.get(idempotency_key) {
            return Some(hit);
        }
        match self.durable.find_payment_result(idempotency_key).await {
            Ok(Some(result)) => {
                self.hot.put(idempotency_key.to_string(), result.clone());
                Some(result)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%err, idempotency_key, "durable idempotency lookup failed, treating as miss");
                None
            }
        }
    }

    pub fn store(&self, idempotency_key: &str, result: PaymentResult) {
        self.hot.put(idempotency_key.to_string(), result);
    }

    pub fn sweep(&self) {
        self.hot.sweep();
    }
}

/// Refund-side idempotency cache, identical shape, kept as a distinct type
/// since refund and payment keys live in separate namespaces (spec.md §4.7).
pub struct RefundIdempotencyStore {
    hot: HotCache<RefundResult>,
    durable: Arc<dyn DurableRefundLookup>,
}

impl RefundIdempotencyStore {
    pub fn new(ttl: Duration, durable: Arc<dyn DurableRefundLookup>) -> Self {
        Self {
            hot: HotCache::new(ttl),
            durable,
        }
    }

    pub async fn get_cached(&self, idempotency_key: &str) -> Option<RefundResult> {
        if let Some(hit) = self.hot.get(idempotency_key) {
            return Some(hit);
        }
        match self.durable.find_refund_result(idempotency_key).await {
            Ok(Some(result)) => {
                self.hot.put(idempotency_key.to_string(), result.clone());
                Some(result)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%err, idempotency_key, "durable refund idempotency lookup failed, treating as miss");
                None
            }
        }
    }

    pub fn store(&self, idempotency_key: &str, result: RefundResult) {
        self.hot.put(idempotency_key.to_string(), result);
    }

    pub fn sweep(&self) {
        self.hot.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amount, PaymentStatus};
    use chrono::Utc;

    struct EmptyDurable;

    #[async_trait]
    impl DurablePaymentLookup for EmptyDurable {
        async fn find_payment_result(
            &self,
            _idempotency_key: &str,
        ) -> Result<Option<PaymentResult>, StoreError> {
            Ok(None)
        }
    }

    fn sample_result(key: &str) -> PaymentResult {
        PaymentResult {
            idempotency_key: key.to_string(),
            provider_transaction_id: Some("tx1".into()),
            status: PaymentStatus::Success,
            amount: Amount::from_decimal_str("10.00").unwrap(),
            currency_code: "USD".into(),
            failure_code: None,
            message: None,
            timestamp: Utc::now(),
            metadata: Default::default(),
            card_identity: Default::default(),
        }
    }

    #[tokio::test]
    async fn hot_hit_avoids_durable_lookup() {
        let store = PaymentIdempotencyStore::new(Duration::from_secs(60), Arc::new(EmptyDurable));
        store.store("k1", sample_result("k1"));
        let cached = store.get_cached("k1").await.unwrap();
        assert_eq!(cached.idempotency_key, "k1");
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let store = PaymentIdempotencyStore::new(Duration::from_millis(5), Arc::new(EmptyDurable));
        store.store("k2", sample_result("k2"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get_cached("k2").await.is_none());
    }
}
