//! Payment and refund orchestrators, spec.md §4.6–§4.7.
//!
//! Composition mirrors the teacher's `AppState`-held, `Arc`-shared
//! singleton services pattern in `main.rs`: both orchestrators are built
//! once at startup over shared registries (adapters, breakers, metrics,
//! idempotency, persistence, event log) and held as `Arc<...>` fields on
//! `AppState`.

mod payment;
mod refund;

pub use payment::PaymentOrchestrator;
pub use refund::RefundOrchestrator;

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::PaymentAdapter;
use crate::models::ProviderType;
use crate::routing::RoutingCandidate;

/// Process-wide registry of PSP adapters, indexed both by name (for direct
/// lookup, e.g. refund adapter resolution) and by provider type (for
/// building routing candidate sets). Built once at startup — spec.md §9:
/// "no request-time mutation of their identities."
pub struct AdapterRegistry {
    by_name: HashMap<String, Arc<dyn PaymentAdapter>>,
    by_provider_type: HashMap<ProviderType, Vec<String>>,
}

impl AdapterRegistry {
    pub fn new(adapters: Vec<Arc<dyn PaymentAdapter>>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_provider_type: HashMap<ProviderType, Vec<String>> = HashMap::new();
        for adapter in adapters {
            let name = adapter.adapter_name().to_string();
            by_provider_type
                .entry(adapter.provider_type())
                .or_default()
                .push(name.clone());
            by_name.insert(name, adapter);
        }
        Self {
            by_name,
            by_provider_type,
        }
    }

    pub fn get(&self, adapter_name: &str) -> Option<Arc<dyn PaymentAdapter>> {
        self.by_name.get(adapter_name).cloned()
    }

    /// Candidates of `provider_type`, excluding names in `exclude` and
    /// adapters that report themselves unhealthy (spec.md §4.1's local
    /// health signal, independent of the breaker).
    pub fn candidates(&self, provider_type: ProviderType, exclude: &[String]) -> Vec<RoutingCandidate> {
        self.by_provider_type
            .get(&provider_type)
            .into_iter()
            .flatten()
            .filter(|name| !exclude.iter().any(|ex| ex == *name))
            .filter_map(|name| {
                let adapter = self.by_name.get(name)?;
                if !adapter.is_healthy() {
                    return None;
                }
                Some(RoutingCandidate {
                    adapter_name: name.clone(),
                    provider_type,
                })
            })
            .collect()
    }
}
