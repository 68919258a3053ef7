//! Pluggable routing strategies, spec.md §4.5.
//!
//! Grounded in the teacher's `arbitrage::engine::ArbitrageEngine` (pure
//! selection function over a read-only market/metrics snapshot) and
//! `route_quality::mitigation::select_failover_target` (argmin/argmax over
//! a candidate list with first-in-order tie-break).

mod strategies;

use crate::config::RoutingStrategyKind;
use crate::metrics::{AdapterSnapshot, MetricsRegistry};
use crate::models::ProviderType;

pub use strategies::{CostBased, Hybrid, LeastConnections, ResponseTimeBased, WeightedRoundRobin};

/// One routable adapter, as seen by a strategy.
#[derive(Debug, Clone)]
pub struct RoutingCandidate {
    pub adapter_name: String,
    pub provider_type: ProviderType,
}

/// Selection trait. Implementations read `MetricsRegistry` but never write
/// it; per-strategy mutable state (e.g. a round-robin cursor) is kept
/// internally behind its own synchronization.
pub trait RoutingStrategy: Send + Sync {
    fn select(&self, candidates: &[RoutingCandidate], metrics: &MetricsRegistry) -> Option<String>;
}

pub fn build(kind: RoutingStrategyKind) -> Box<dyn RoutingStrategy> {
    match kind {
        RoutingStrategyKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
        RoutingStrategyKind::LeastConnections => Box::new(LeastConnections),
        RoutingStrategyKind::CostBased => Box::new(CostBased),
        RoutingStrategyKind::ResponseTimeBased => Box::new(ResponseTimeBased),
        RoutingStrategyKind::Hybrid => Box::new(Hybrid),
    }
}

pub(crate) type SnapshotRow<'a> = (&'a RoutingCandidate, AdapterSnapshot);

pub(crate) fn snapshots<'a>(
    candidates: &'a [RoutingCandidate],
    metrics: &MetricsRegistry,
) -> Vec<SnapshotRow<'a>> {
    candidates
        .iter()
        .map(|c| (c, metrics.snapshot(&c.adapter_name)))
        .collect()
}

pub(crate) fn success_rate(snapshot: &AdapterSnapshot) -> f64 {
    if snapshot.calls_total == 0 {
        1.0
    } else {
        snapshot.successes_total as f64 / snapshot.calls_total as f64
    }
}

/// argmin over `key`, first-in-order tie-break (spec.md §4.5).
pub(crate) fn argmin<'a>(
    items: &'a [SnapshotRow<'a>],
    key: impl Fn(&AdapterSnapshot) -> f64,
) -> Option<&'a str> {
    items
        .iter()
        .map(|(c, snap)| (c.adapter_name.as_str(), key(snap)))
        .fold(None, |best: Option<(&str, f64)>, (name, value)| match best {
            None => Some((name, value)),
            Some((_, best_value)) if value < best_value => Some((name, value)),
            Some(existing) => Some(existing),
        })
        .map(|(name, _)| name)
}

pub(crate) fn argmax<'a>(
    items: &'a [SnapshotRow<'a>],
    key: impl Fn(&AdapterSnapshot) -> f64,
) -> Option<&'a str> {
    items
        .iter()
        .map(|(c, snap)| (c.adapter_name.as_str(), key(snap)))
        .fold(None, |best: Option<(&str, f64)>, (name, value)| match best {
            None => Some((name, value)),
            Some((_, best_value)) if value > best_value => Some((name, value)),
            Some(existing) => Some(existing),
        })
        .map(|(name, _)| name)
}

/// Stable key for a candidate set, used by `WeightedRoundRobin` to keep a
/// cursor per distinct set of routable adapters.
pub(crate) fn candidate_set_key(candidates: &[RoutingCandidate]) -> String {
    let mut names: Vec<&str> = candidates.iter().map(|c| c.adapter_name.as_str()).collect();
    names.sort_unstable();
    names.join(",")
}
