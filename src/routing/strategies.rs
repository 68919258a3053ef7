use std::collections::HashMap;

use parking_lot::Mutex;

use super::{argmax, argmin, candidate_set_key, snapshots, success_rate, RoutingCandidate};
use crate::metrics::{AdapterSnapshot, MetricsRegistry};
use crate::routing::RoutingStrategy;

/// weight = max(1, round(successRate·100)); pick by cumulative weight over
/// a cursor that advances by one unit per selection, modulo total weight.
pub struct WeightedRoundRobin {
    cursor: Mutex<HashMap<String, u64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self {
            cursor: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingStrategy for WeightedRoundRobin {
    fn select(&self, candidates: &[RoutingCandidate], metrics: &MetricsRegistry) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let rows = snapshots(candidates, metrics);
        let weights: Vec<u64> = rows
            .iter()
            .map(|(_, snap)| (success_rate(snap) * 100.0).round().max(1.0) as u64)
            .collect();
        let total: u64 = weights.iter().sum();
        if total == 0 {
            return Some(candidates[0].adapter_name.clone());
        }

        let key = candidate_set_key(candidates);
        let mut cursors = self.cursor.lock();
        let cursor = cursors.entry(key).or_insert(0);
        let position = *cursor % total;
        *cursor = cursor.wrapping_add(1);

        let mut running = 0u64;
        for (row, weight) in rows.iter().zip(weights.iter()) {
            running += weight;
            if position < running {
                return Some(row.0.adapter_name.clone());
            }
        }
        Some(candidates[0].adapter_name.clone())
    }
}

/// argmin(activeConnections).
pub struct LeastConnections;

impl RoutingStrategy for LeastConnections {
    fn select(&self, candidates: &[RoutingCandidate], metrics: &MetricsRegistry) -> Option<String> {
        let rows = snapshots(candidates, metrics);
        argmin(&rows, |s| s.active_calls as f64).map(str::to_string)
    }
}

/// argmin(avgCost / max(successRate, ε)).
pub struct CostBased;

const EPSILON: f64 = 1e-6;

impl RoutingStrategy for CostBased {
    fn select(&self, candidates: &[RoutingCandidate], metrics: &MetricsRegistry) -> Option<String> {
        let rows = snapshots(candidates, metrics);
        argmin(&rows, |s| s.cost_per_call() / success_rate(s).max(EPSILON)).map(str::to_string)
    }
}

/// argmin(avgLatency).
pub struct ResponseTimeBased;

impl RoutingStrategy for ResponseTimeBased {
    fn select(&self, candidates: &[RoutingCandidate], metrics: &MetricsRegistry) -> Option<String> {
        let rows = snapshots(candidates, metrics);
        argmin(&rows, |s| s.avg_latency_ms).map(str::to_string)
    }
}

/// argmax(0.40·successRate + 0.30·(1 − latency/5000ms) + 0.20·(1 − cost/$1)
/// + 0.10·(1 − conn/100)), each term clamped to [0,1].
pub struct Hybrid;

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

fn hybrid_score(snapshot: &AdapterSnapshot) -> f64 {
    let success_term = clamp01(success_rate(snapshot));
    let latency_term = clamp01(1.0 - snapshot.avg_latency_ms / 5000.0);
    let cost_term = clamp01(1.0 - snapshot.cost_per_call() / 100.0);
    let conn_term = clamp01(1.0 - snapshot.active_calls as f64 / 100.0);
    0.40 * success_term + 0.30 * latency_term + 0.20 * cost_term + 0.10 * conn_term
}

impl RoutingStrategy for Hybrid {
    fn select(&self, candidates: &[RoutingCandidate], metrics: &MetricsRegistry) -> Option<String> {
        let rows = snapshots(candidates, metrics);
        argmax(&rows, hybrid_score).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderType;

    fn candidate(name: &str) -> RoutingCandidate {
        RoutingCandidate {
            adapter_name: name.to_string(),
            provider_type: ProviderType::Card,
        }
    }

    #[test]
    fn least_connections_picks_lowest_active_count() {
        let metrics = MetricsRegistry::new();
        metrics.call_started("a");
        metrics.call_started("a");
        metrics.call_started("b");

        let strategy = LeastConnections;
        let selected = strategy
            .select(&[candidate("a"), candidate("b")], &metrics)
            .unwrap();
        assert_eq!(selected, "b");
    }

    #[test]
    fn response_time_based_picks_lowest_latency() {
        let metrics = MetricsRegistry::new();
        metrics.call_started("a");
        metrics.call_finished("a", true, 200, 0);
        metrics.call_started("b");
        metrics.call_finished("b", true, 20, 0);

        let strategy = ResponseTimeBased;
        let selected = strategy
            .select(&[candidate("a"), candidate("b")], &metrics)
            .unwrap();
        assert_eq!(selected, "b");
    }

    #[test]
    fn ties_break_to_first_in_input_order() {
        let metrics = MetricsRegistry::new();
        let strategy = LeastConnections;
        let selected = strategy
            .select(&[candidate("a"), candidate("b")], &metrics)
            .unwrap();
        assert_eq!(selected, "a");
    }

    #[test]
    fn weighted_round_robin_favors_higher_success_rate_over_many_picks() {
        let metrics = MetricsRegistry::new();
        for _ in 0..10 {
            metrics.call_started("good");
            metrics.call_finished("good", true, 10, 0);
        }
        for _ in 0..10 {
            metrics.call_started("bad");
            metrics.call_finished("bad", false, 10, 0);
        }

        let strategy = WeightedRoundRobin::new();
        let candidates = [candidate("good"), candidate("bad")];
        let mut good_count = 0;
        for _ in 0..100 {
            if strategy.select(&candidates, &metrics).unwrap() == "good" {
                good_count += 1;
            }
        }
        assert!(good_count > 50, "expected good adapter to dominate, got {good_count}/100");
    }
}
