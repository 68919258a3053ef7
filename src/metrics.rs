//! Per-adapter performance metrics, spec.md §4.4 / §4.5 (response-time/cost
//! based routing) and §4.6.
//!
//! Grounded in the teacher's `route_quality::metrics::RouteQualityMetrics`:
//! a registry of per-key counters behind a lock, here keyed by adapter name
//! instead of scraped endpoint. The sliding-window halving (spec.md §4.4:
//! "when total exceeds a cap, halve counts to retain a decaying history")
//! needs several counters to move together, so the counters live behind
//! one `parking_lot::Mutex` per adapter rather than independent atomics —
//! the same per-entry-mutex shape `breaker.rs` uses for its state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Mutex, RwLock};

/// When `calls_total` exceeds this cap, every counter is halved in place
/// (spec.md §4.4). Halving rather than resetting keeps the derived rates
/// continuous instead of snapping to zero.
const SLIDING_WINDOW_CAP: u64 = 1000;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    calls_total: u64,
    successes_total: u64,
    failures_total: u64,
    latency_sum_ms: u64,
    cost_sum_minor_units: i64,
}

impl Counters {
    fn halve_if_over_cap(&mut self) {
        if self.calls_total > SLIDING_WINDOW_CAP {
            self.calls_total /= 2;
            self.successes_total /= 2;
            self.failures_total /= 2;
            self.latency_sum_ms /= 2;
            self.cost_sum_minor_units /= 2;
        }
    }
}

#[derive(Debug, Default)]
struct AdapterMetrics {
    counters: Mutex<Counters>,
    /// Concurrency is a live gauge, not part of the decaying window, so it
    /// stays a plain atomic outside the counters lock.
    active_calls: AtomicI64,
}

/// A snapshot of one adapter's performance, used by the response-time and
/// cost-based routing strategies.
#[derive(Debug, Clone, Copy)]
pub struct AdapterSnapshot {
    pub calls_total: u64,
    pub successes_total: u64,
    pub failures_total: u64,
    pub failure_rate: f64,
    pub avg_latency_ms: f64,
    pub active_calls: i64,
    pub total_cost_minor_units: i64,
}

impl AdapterSnapshot {
    pub fn cost_per_call(&self) -> f64 {
        if self.calls_total == 0 {
            0.0
        } else {
            self.total_cost_minor_units as f64 / self.calls_total as f64
        }
    }
}

/// Registry of per-adapter metrics, one entry per adapter name, behind a
/// reader-writer lock guarding the map; each entry's own counters are
/// behind a per-adapter mutex, the same registry-of-locked-entries split
/// the teacher uses in `RouteQualityMetrics`.
pub struct MetricsRegistry {
    adapters: RwLock<HashMap<String, AdapterMetrics>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    fn with_entry<R>(&self, adapter_name: &str, f: impl FnOnce(&AdapterMetrics) -> R) -> R {
        {
            let read = self.adapters.read();
            if let Some(entry) = read.get(adapter_name) {
                return f(entry);
            }
        }
        let mut write = self.adapters.write();
        let entry = write
            .entry(adapter_name.to_string())
            .or_insert_with(AdapterMetrics::default);
        f(entry)
    }

    pub fn call_started(&self, adapter_name: &str) {
        self.with_entry(adapter_name, |m| {
            {
                let mut counters = m.counters.lock();
                counters.calls_total += 1;
                counters.halve_if_over_cap();
            }
            m.active_calls.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Accounts an open-breaker short-circuit (spec.md §9 open question:
    /// "prior art counts each open-breaker short-circuit as a failure
    /// metric"). Unlike `call_finished`, this never touches
    /// `active_calls` — no call was ever started, the breaker refused it
    /// outright.
    pub fn record_call_not_permitted(&self, adapter_name: &str) {
        self.with_entry(adapter_name, |m| {
            let mut counters = m.counters.lock();
            counters.calls_total += 1;
            counters.failures_total += 1;
            counters.halve_if_over_cap();
        });
    }

    pub fn call_finished(
        &self,
        adapter_name: &str,
        success: bool,
        latency_ms: u64,
        cost_minor_units: i64,
    ) {
        self.with_entry(adapter_name, |m| {
            m.active_calls.fetch_sub(1, Ordering::Relaxed);
            let mut counters = m.counters.lock();
            if success {
                counters.successes_total += 1;
            } else {
                counters.failures_total += 1;
            }
            counters.latency_sum_ms += latency_ms;
            counters.cost_sum_minor_units += cost_minor_units;
            counters.halve_if_over_cap();
        });
    }

    pub fn snapshot(&self, adapter_name: &str) -> AdapterSnapshot {
        self.with_entry(adapter_name, |m| {
            let counters = *m.counters.lock();
            let failure_rate = if counters.calls_total == 0 {
                0.0
            } else {
                counters.failures_total as f64 / counters.calls_total as f64
            };
            let avg_latency_ms = if counters.calls_total == 0 {
                0.0
            } else {
                counters.latency_sum_ms as f64 / counters.calls_total as f64
            };
            AdapterSnapshot {
                calls_total: counters.calls_total,
                successes_total: counters.successes_total,
                failures_total: counters.failures_total,
                failure_rate,
                avg_latency_ms,
                active_calls: m.active_calls.load(Ordering::Relaxed),
                total_cost_minor_units: counters.cost_sum_minor_units,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_success_and_failure_counts() {
        let registry = MetricsRegistry::new();
        registry.call_started("mock-stripe");
        registry.call_finished("mock-stripe", true, 40, 10);
        registry.call_started("mock-stripe");
        registry.call_finished("mock-stripe", false, 60, 10);

        let snap = registry.snapshot("mock-stripe");
        assert_eq!(snap.calls_total, 2);
        assert_eq!(snap.successes_total, 1);
        assert_eq!(snap.failures_total, 1);
        assert!((snap.failure_rate - 0.5).abs() < 1e-9);
        assert!((snap.avg_latency_ms - 50.0).abs() < 1e-9);
        assert_eq!(snap.active_calls, 0);
    }

    #[test]
    fn unseen_adapter_has_zeroed_snapshot() {
        let registry = MetricsRegistry::new();
        let snap = registry.snapshot("never-called");
        assert_eq!(snap.calls_total, 0);
        assert_eq!(snap.failure_rate, 0.0);
    }

    #[test]
    fn counts_halve_past_the_sliding_window_cap() {
        let registry = MetricsRegistry::new();
        for _ in 0..(SLIDING_WINDOW_CAP + 1) {
            registry.call_started("busy-adapter");
            registry.call_finished("busy-adapter", true, 10, 1);
        }
        let snap = registry.snapshot("busy-adapter");
        assert!(
            snap.calls_total <= SLIDING_WINDOW_CAP,
            "expected counts to have halved back under the cap, got {}",
            snap.calls_total
        );
        assert!(snap.calls_total > 0);
        // Ratio is preserved by halving every counter together.
        assert!((snap.failure_rate - 0.0).abs() < 1e-9);
    }
}
