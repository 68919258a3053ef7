//! Rolling per-entity window aggregator, spec.md §4.9.
//!
//! Shaped like the teacher's ring-buffer rolling-window calculators
//! (`risk::KellyCalculator::win_history`, a `VecDeque` capped by eviction
//! rather than by a fixed index), generalized from one dimension (trade
//! win/loss) to four independent entity dimensions per event.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;
use statrs::statistics::Statistics;

use crate::models::{CardIdentity, EntityType, PaymentEvent, WindowFeatures};

const HORIZON: chrono::Duration = chrono::Duration::minutes(5);

struct Observation {
    timestamp: DateTime<Utc>,
    amount: f64,
    failure: bool,
}

pub struct WindowAggregator {
    windows: Mutex<HashMap<(EntityType, String), VecDeque<Observation>>>,
}

impl Default for WindowAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowAggregator {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Appends this event's dimension keys to their windows and returns the
    /// freshly computed features for every dimension that applies.
    pub fn record(&self, event: &PaymentEvent) -> Vec<WindowFeatures> {
        let mut out = Vec::with_capacity(4);
        let mut windows = self.windows.lock();

        for (entity_type, entity_id) in entity_keys(event) {
            let window = windows
                .entry((entity_type, entity_id.clone()))
                .or_insert_with(VecDeque::new);

            window.push_back(Observation {
                timestamp: event.timestamp,
                amount: event.amount.as_f64(),
                failure: event.status.is_failure(),
            });

            let cutoff = event.timestamp - HORIZON;
            while window
                .front()
                .map(|obs| obs.timestamp < cutoff)
                .unwrap_or(false)
            {
                window.pop_front();
            }

            let mut features = compute_features(entity_type, &entity_id, event.timestamp, window);
            if entity_type == EntityType::Card {
                features.card_identity_is_fallback = is_fallback_fingerprint(&event.card_identity);
            }
            out.push(features);
        }

        out
    }

    pub fn features(&self, entity_type: EntityType, entity_id: &str) -> Option<WindowFeatures> {
        let windows = self.windows.lock();
        let window = windows.get(&(entity_type, entity_id.to_string()))?;
        let now = window.back()?.timestamp;
        Some(compute_features(entity_type, entity_id, now, window))
    }
}

fn entity_keys(event: &PaymentEvent) -> Vec<(EntityType, String)> {
    let mut keys = Vec::with_capacity(4);

    if !event.merchant_reference.is_empty() {
        keys.push((EntityType::Merchant, event.merchant_reference.clone()));
    }

    if let Some(card_key) = card_dimension_key(event) {
        keys.push((EntityType::Card, card_key));
    }

    if let Some(email) = &event.email {
        if !email.is_empty() {
            keys.push((EntityType::Email, email.to_lowercase()));
        }
    }

    if let Some(ip) = &event.client_ip {
        if !ip.is_empty() {
            keys.push((EntityType::Ip, ip.clone()));
        }
    }

    keys
}

/// CARD dimension key, absent for BNPL (no card data). Falls back to
/// `bin+last4+providerType` when no card fingerprint is present — the
/// identity-stability tradeoff recorded as an open question in DESIGN.md.
fn card_dimension_key(event: &PaymentEvent) -> Option<String> {
    if event.provider_type == crate::models::ProviderType::Bnpl {
        return None;
    }
    if let Some(fp) = &event.card_identity.card_fingerprint {
        if !fp.is_empty() {
            return Some(fp.clone());
        }
    }
    let bin = event.card_identity.card_bin.as_deref()?;
    let last4 = event.card_identity.card_last4.as_deref()?;
    if bin.is_empty() || last4.is_empty() {
        return None;
    }
    Some(format!("{bin}{last4}{}", event.provider_type))
}

fn is_fallback_fingerprint(card_identity: &CardIdentity) -> bool {
    card_identity
        .card_fingerprint
        .as_deref()
        .map(str::is_empty)
        .unwrap_or(true)
}

fn compute_features(
    entity_type: EntityType,
    entity_id: &str,
    now: DateTime<Utc>,
    window: &VecDeque<Observation>,
) -> WindowFeatures {
    let total_count = window.len() as u64;
    let failure_count = window.iter().filter(|o| o.failure).count() as u64;
    let failure_rate = if total_count == 0 {
        0.0
    } else {
        failure_count as f64 / total_count as f64
    };

    let one_min_cutoff = now - chrono::Duration::minutes(1);
    let count_last_1min = window.iter().filter(|o| o.timestamp >= one_min_cutoff).count() as u64;
    let count_last_5min = total_count;

    let amounts: Vec<f64> = window.iter().map(|o| o.amount).collect();
    let (avg_amount, min_amount, max_amount, amount_variance) = if amounts.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let avg = amounts.clone().mean();
        let variance = if amounts.len() > 1 {
            amounts.clone().variance()
        } else {
            0.0
        };
        let min = amounts.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = amounts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (avg, min, max, variance)
    };

    let amount_trend = if amounts.len() >= 3 {
        linear_regression_sign(&amounts)
    } else {
        0
    };

    let mut increasing_amount_count = 0u32;
    let mut decreasing_amount_count = 0u32;
    for pair in amounts.windows(2) {
        if pair[1] > pair[0] {
            increasing_amount_count += 1;
        } else if pair[1] < pair[0] {
            decreasing_amount_count += 1;
        }
    }

    let gaps: Vec<f64> = window
        .iter()
        .zip(window.iter().skip(1))
        .map(|(a, b)| (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0)
        .collect();
    let avg_time_gap_seconds = if gaps.is_empty() {
        0.0
    } else {
        gaps.iter().sum::<f64>() / gaps.len() as f64
    };

    let seconds_since_last_transaction = if window.len() >= 2 {
        let prev = window[window.len() - 2].timestamp;
        (now - prev).num_milliseconds() as f64 / 1000.0
    } else {
        f64::MAX
    };

    WindowFeatures {
        entity_id: entity_id.to_string(),
        entity_type,
        window_start: window.front().map(|o| o.timestamp).unwrap_or(now),
        window_end: now,
        total_count,
        failure_count,
        failure_rate,
        count_last_1min,
        count_last_5min,
        avg_amount,
        min_amount,
        max_amount,
        amount_variance,
        amount_trend,
        increasing_amount_count,
        decreasing_amount_count,
        avg_time_gap_seconds,
        seconds_since_last_transaction,
        hour_of_day: now.hour(),
        day_of_week: now.weekday().num_days_from_sunday(),
        card_identity_is_fallback: false,
    }
}

/// Sign of the OLS slope of amount vs index. `statrs` covers the
/// mean/variance moments above; the slope itself is the textbook two-sum
/// formula, which `statrs` does not provide a dedicated regression for.
fn linear_regression_sign(ys: &[f64]) -> i8 {
    let n = ys.len() as f64;
    let xs: Vec<f64> = (0..ys.len()).map(|i| i as f64).collect();
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        numerator += (x - x_mean) * (y - y_mean);
        denominator += (x - x_mean).powi(2);
    }

    if denominator == 0.0 {
        return 0;
    }
    let slope = numerator / denominator;
    if slope > 0.0 {
        1
    } else if slope < 0.0 {
        -1
    } else {
        0
    }
}
