//! Per-adapter circuit breaker, spec.md §4.3.
//!
//! Generalized from the teacher's `route_quality::mitigation::CircuitBreaker`
//! (which keyed breaker state per scraped endpoint and tripped on
//! consecutive failures) into a per-adapter-name registry that trips on a
//! sliding failure-rate window, the same ring-buffer idiom the teacher uses
//! for `risk::KellyCalculator::win_history`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::BreakerConfig;
use crate::error::CallNotPermitted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    /// Ring buffer of the last `window_size` outcomes (`true` = success).
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            half_open_successes: 0,
        }
    }
}

/// Tracks one breaker per adapter name behind a single lock, mirroring the
/// teacher's registry-of-breakers-behind-one-mutex shape.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn state_of(&self, adapter_name: &str) -> CircuitState {
        let mut guard = self.breakers.lock();
        let entry = guard
            .entry(adapter_name.to_string())
            .or_insert_with(BreakerState::new);
        self.maybe_transition_to_half_open(entry);
        entry.state
    }

    /// Returns `Err(CallNotPermitted)` without recording anything when the
    /// breaker is open and its cooldown has not yet elapsed. On permit, the
    /// caller is expected to report the outcome via `record_success` /
    /// `record_failure`.
    pub fn check(&self, adapter_name: &str) -> Result<(), CallNotPermitted> {
        let mut guard = self.breakers.lock();
        let entry = guard
            .entry(adapter_name.to_string())
            .or_insert_with(BreakerState::new);
        self.maybe_transition_to_half_open(entry);
        match entry.state {
            CircuitState::Open => Err(CallNotPermitted),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    fn maybe_transition_to_half_open(&self, entry: &mut BreakerState) {
        if entry.state == CircuitState::Open {
            if let Some(opened_at) = entry.opened_at {
                if opened_at.elapsed() >= self.config.open_duration {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_successes = 0;
                }
            }
        }
    }

    pub fn record_success(&self, adapter_name: &str) {
        let mut guard = self.breakers.lock();
        let entry = guard
            .entry(adapter_name.to_string())
            .or_insert_with(BreakerState::new);

        match entry.state {
            CircuitState::HalfOpen => {
                entry.half_open_successes += 1;
                if entry.half_open_successes >= self.config.half_open_successes_to_close {
                    entry.state = CircuitState::Closed;
                    entry.window.clear();
                    entry.opened_at = None;
                }
            }
            CircuitState::Closed => {
                push_outcome(&mut entry.window, true, self.config.window_size);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, adapter_name: &str) {
        let mut guard = self.breakers.lock();
        let entry = guard
            .entry(adapter_name.to_string())
            .or_insert_with(BreakerState::new);

        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                entry.half_open_successes = 0;
            }
            CircuitState::Closed => {
                push_outcome(&mut entry.window, false, self.config.window_size);
                if entry.window.len() >= self.config.min_calls {
                    let failures = entry.window.iter().filter(|ok| !**ok).count();
                    let rate = failures as f64 / entry.window.len() as f64;
                    if rate >= self.config.failure_rate_threshold {
                        entry.state = CircuitState::Open;
                        entry.opened_at = Some(Instant::now());
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Cooldown remaining before an open breaker becomes half-open, if any.
    pub fn cooldown_remaining(&self, adapter_name: &str) -> Option<Duration> {
        let guard = self.breakers.lock();
        let entry = guard.get(adapter_name)?;
        if entry.state != CircuitState::Open {
            return None;
        }
        let elapsed = entry.opened_at?.elapsed();
        Some(self.config.open_duration.saturating_sub(elapsed))
    }
}

fn push_outcome(window: &mut VecDeque<bool>, ok: bool, cap: usize) {
    window.push_back(ok);
    while window.len() > cap {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            window_size: 10,
            min_calls: 4,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_millis(20),
            half_open_successes_to_close: 2,
        }
    }

    #[test]
    fn opens_after_failure_rate_threshold_crossed() {
        let reg = CircuitBreakerRegistry::new(config());
        for _ in 0..4 {
            reg.check("adapter-a").unwrap();
            reg.record_failure("adapter-a");
        }
        assert_eq!(reg.state_of("adapter-a"), CircuitState::Open);
        assert!(reg.check("adapter-a").is_err());
    }

    #[test]
    fn half_open_closes_after_required_successes() {
        let reg = CircuitBreakerRegistry::new(config());
        for _ in 0..4 {
            reg.record_failure("adapter-b");
        }
        assert_eq!(reg.state_of("adapter-b"), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(reg.state_of("adapter-b"), CircuitState::HalfOpen);

        reg.record_success("adapter-b");
        assert_eq!(reg.state_of("adapter-b"), CircuitState::HalfOpen);
        reg.record_success("adapter-b");
        assert_eq!(reg.state_of("adapter-b"), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let reg = CircuitBreakerRegistry::new(config());
        for _ in 0..4 {
            reg.record_failure("adapter-c");
        }
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(reg.state_of("adapter-c"), CircuitState::HalfOpen);
        reg.record_failure("adapter-c");
        assert_eq!(reg.state_of("adapter-c"), CircuitState::Open);
    }
}
