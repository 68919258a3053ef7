//! Ingress velocity sampling for admission control, spec.md §5.
//!
//! Per-email and per-IP request counts are sampled at ingress over a
//! rolling 60s window; crossing the caller-configured cap sets an
//! `overThreshold` flag for downstream logging/shedding. Policy
//! enforcement itself (actually rejecting a request) is a caller concern
//! per spec.md — this module only samples and annotates.
//!
//! Grounded in `middleware::rate_limit::RateLimitLayer`'s sweep-on-access
//! per-key window counter, reused here keyed by email/IP instead of
//! socket address.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

struct Counter {
    count: u32,
    window_start: Instant,
}

struct SlidingCounters {
    entries: Mutex<HashMap<String, Counter>>,
}

impl SlidingCounters {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records one occurrence for `key` and returns the count within the
    /// current 60s window (including this occurrence).
    fn record(&self, key: &str) -> u32 {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let entry = entries.entry(key.to_string()).or_insert(Counter {
            count: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) >= WINDOW {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
        entry.count
    }

    fn sweep(&self) {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.window_start) < WINDOW * 2);
    }
}

/// Samples request velocity for one `PaymentRequest` at ingress and
/// reports whether either dimension crossed its configured cap.
pub struct VelocitySampler {
    by_email: SlidingCounters,
    by_ip: SlidingCounters,
    max_per_email_per_60s: u32,
    max_per_ip_per_60s: u32,
}

impl VelocitySampler {
    pub fn new(config: &crate::config::VelocityConfig) -> Self {
        Self {
            by_email: SlidingCounters::new(),
            by_ip: SlidingCounters::new(),
            max_per_email_per_60s: config.max_per_email_per_60s,
            max_per_ip_per_60s: config.max_per_ip_per_60s,
        }
    }

    /// Returns `true` if this request pushed its email or IP dimension
    /// over the configured 60s cap.
    pub fn sample(&self, email: Option<&str>, client_ip: Option<&str>) -> bool {
        let mut over = false;
        if let Some(email) = email {
            if self.by_email.record(&email.to_lowercase()) > self.max_per_email_per_60s {
                over = true;
            }
        }
        if let Some(ip) = client_ip {
            if self.by_ip.record(ip) > self.max_per_ip_per_60s {
                over = true;
            }
        }
        over
    }

    pub fn sweep(&self) {
        self.by_email.sweep();
        self.by_ip.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VelocityConfig;

    #[test]
    fn flags_over_threshold_once_cap_crossed() {
        let sampler = VelocitySampler::new(&VelocityConfig {
            max_per_email_per_60s: 2,
            max_per_ip_per_60s: 100,
        });
        assert!(!sampler.sample(Some("a@example.com"), None));
        assert!(!sampler.sample(Some("a@example.com"), None));
        assert!(sampler.sample(Some("a@example.com"), None));
    }

    #[test]
    fn dimensions_are_independent() {
        let sampler = VelocitySampler::new(&VelocityConfig {
            max_per_email_per_60s: 100,
            max_per_ip_per_60s: 1,
        });
        assert!(!sampler.sample(Some("b@example.com"), Some("1.1.1.1")));
        assert!(sampler.sample(Some("c@example.com"), Some("1.1.1.1")));
    }
}
