//! Rule-based risk scoring, spec.md §4.10.
//!
//! Grounded in the teacher's `signals::detector::SignalDetector` predicate
//! style (independent boolean checks over a features struct, each
//! contributing a score, the max taken) and `risk::KellyCalculator`'s
//! threshold-to-level mapping idiom.

use std::collections::HashSet;

use uuid::Uuid;

use crate::config::RiskConfig;
use crate::models::{AlertLevel, EntityType, RiskAlert, SignalType, WindowFeatures};

/// Evaluates one dimension's features against the rule taxonomy, returning
/// its contribution to the final score and the signals it fired.
/// `current_amount` is the triggering event's own amount, used only by the
/// UNUSUAL_AMOUNT predicate (`WindowFeatures` otherwise describes the
/// window, not the event that produced it).
fn evaluate_dimension(
    features: &WindowFeatures,
    current_amount: f64,
    config: &RiskConfig,
) -> (f64, HashSet<SignalType>) {
    let mut score: f64 = 0.0;
    let mut signals = HashSet::new();

    let failure_signal = match features.entity_type {
        EntityType::Merchant | EntityType::Card => SignalType::HighFailureRate,
        EntityType::Email => SignalType::HighEmailFailureRate,
        EntityType::Ip => SignalType::HighIpFailureRate,
    };

    if features.failure_rate >= config.high_failure_rate_threshold {
        let contribution = 0.4 + 0.4 * features.failure_rate;
        score = score.max(contribution);
        signals.insert(failure_signal);
    }

    if features.failure_count >= 3 && features.total_count <= 10 {
        score = score.max(0.5);
        signals.insert(SignalType::RepeatedFailures);
    }

    let velocity_by_count = features.count_last_1min >= config.velocity_1min_threshold;
    let velocity_by_gap = features.total_count >= 3
        && features.seconds_since_last_transaction > 0.0
        && features.seconds_since_last_transaction < 5.0
        && features.avg_time_gap_seconds < 3.0;

    if velocity_by_count || velocity_by_gap {
        if velocity_by_count {
            let contribution = 0.3 + (features.count_last_1min as f64 / 50.0).min(0.4);
            score = score.max(contribution);
        }
        if velocity_by_gap {
            let contribution = 0.35 + ((5.0 - features.avg_time_gap_seconds) / 10.0).min(0.15);
            score = score.max(contribution);
        }
        let velocity_signal = match features.entity_type {
            EntityType::Merchant | EntityType::Card => SignalType::HighVelocity,
            EntityType::Email => SignalType::HighEmailVelocity,
            EntityType::Ip => SignalType::HighIpVelocity,
        };
        signals.insert(velocity_signal);
    }

    if features.total_count >= 3 && features.avg_amount > 0.0 && current_amount / features.avg_amount >= 2.0 {
        score = score.max(0.35);
        signals.insert(SignalType::UnusualAmount);
    }

    if features.total_count >= 3 && features.increasing_amount_count >= 2 && features.amount_trend > 0 {
        let contribution = 0.5 + (0.05 * features.increasing_amount_count as f64).min(0.2);
        score = score.max(contribution);
        signals.insert(SignalType::ComplianceAnomaly);
    }

    (score, signals)
}

pub struct ScoringOutcome {
    pub final_score: f64,
    pub signals: HashSet<SignalType>,
    pub alert: Option<RiskAlert>,
}

/// Combines every dimension's features for one event into a final score
/// and, if it clears threshold, an alert. `ml_merchant_score` is the
/// model-service override for the MERCHANT dimension only (spec.md §4.10).
pub fn score_event(
    features_by_dimension: &[WindowFeatures],
    current_amount: f64,
    event_id: &str,
    ml_merchant_score: Option<f64>,
    config: &RiskConfig,
) -> ScoringOutcome {
    let mut all_signals = HashSet::new();
    let mut best: Option<(f64, &WindowFeatures, bool)> = None;

    for features in features_by_dimension {
        let (mut dim_score, dim_signals) = evaluate_dimension(features, current_amount, config);
        let mut used_ml = false;
        if features.entity_type == EntityType::Merchant {
            if let Some(ml_score) = ml_merchant_score {
                if (0.0..=1.0).contains(&ml_score) {
                    dim_score = ml_score;
                    used_ml = true;
                }
            }
        }
        all_signals.extend(dim_signals);

        match &best {
            None => best = Some((dim_score, features, used_ml)),
            Some((best_score, _, _)) if dim_score > *best_score => {
                best = Some((dim_score, features, used_ml))
            }
            _ => {}
        }
    }

    let final_score = best.map(|(s, _, _)| s).unwrap_or(0.0);

    let alert = if !all_signals.is_empty() && final_score >= config.alert_score_threshold {
        best.map(|(score, features, used_ml)| {
            build_alert(score, features, current_amount, &all_signals, event_id, used_ml)
        })
    } else {
        None
    };

    ScoringOutcome {
        final_score,
        signals: all_signals,
        alert,
    }
}

fn level_for_score(score: f64) -> AlertLevel {
    if score >= 0.8 {
        AlertLevel::Critical
    } else if score >= 0.6 {
        AlertLevel::High
    } else if score >= 0.4 {
        AlertLevel::Medium
    } else {
        AlertLevel::Low
    }
}

fn build_alert(
    score: f64,
    primary: &WindowFeatures,
    current_amount: f64,
    signals: &HashSet<SignalType>,
    event_id: &str,
    used_ml: bool,
) -> RiskAlert {
    let mut signal_types: Vec<SignalType> = signals.iter().copied().collect();
    signal_types.sort_by_key(|s| format!("{s:?}"));

    let method = if used_ml { "ML" } else { "rules" };
    let mut summary = format!(
        "[{method}] {:?} risk on {} {}: signals={:?}, failureRate={:.1}%, velocity1min={}",
        level_for_score(score),
        primary.entity_type,
        primary.entity_id,
        signal_types,
        primary.failure_rate * 100.0,
        primary.count_last_1min,
    );

    if signals.contains(&SignalType::HighEmailFailureRate)
        || signals.contains(&SignalType::HighEmailVelocity)
    {
        summary.push_str(" [email cross-type]");
    }
    if signals.contains(&SignalType::HighIpFailureRate) || signals.contains(&SignalType::HighIpVelocity) {
        summary.push_str(" [IP cross-type]");
    }

    RiskAlert {
        alert_id: Uuid::new_v4().to_string(),
        timestamp: primary.window_end,
        level: level_for_score(score),
        signal_types,
        risk_score: score,
        entity_id: primary.entity_id.clone(),
        entity_type: primary.entity_type,
        related_event_ids: vec![event_id.to_string()],
        amount: crate::models::Amount::from_decimal_str(&format!("{:.2}", current_amount))
            .unwrap_or(crate::models::Amount::ZERO),
        currency_code: "USD".into(),
        summary,
        detailed_explanation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn features(entity_type: EntityType, failure_rate: f64, total_count: u64) -> WindowFeatures {
        WindowFeatures {
            entity_id: "e1".into(),
            entity_type,
            window_start: Utc::now(),
            window_end: Utc::now(),
            total_count,
            failure_count: (failure_rate * total_count as f64).round() as u64,
            failure_rate,
            count_last_1min: 0,
            count_last_5min: total_count,
            avg_amount: 10.0,
            min_amount: 10.0,
            max_amount: 10.0,
            amount_variance: 0.0,
            amount_trend: 0,
            increasing_amount_count: 0,
            decreasing_amount_count: 0,
            avg_time_gap_seconds: 10.0,
            seconds_since_last_transaction: f64::MAX,
            hour_of_day: 12,
            day_of_week: 2,
            card_identity_is_fallback: false,
        }
    }

    fn config() -> RiskConfig {
        RiskConfig {
            engine_enabled: true,
            ml_enabled: false,
            ml_service_url: None,
            ml_timeout_ms: 2000,
            high_failure_rate_threshold: 0.5,
            velocity_1min_threshold: 10,
            alert_score_threshold: 0.3,
        }
    }

    #[test]
    fn high_failure_rate_emits_signal_and_alert() {
        let f = features(EntityType::Merchant, 0.6, 5);
        let outcome = score_event(&[f], 10.0, "evt1", None, &config());
        assert!(outcome.signals.contains(&SignalType::HighFailureRate));
        assert!(outcome.alert.is_some());
        assert!(outcome.final_score >= 0.3);
    }

    #[test]
    fn below_threshold_score_does_not_alert() {
        let mut cfg = config();
        cfg.high_failure_rate_threshold = 0.9;
        cfg.velocity_1min_threshold = 100;
        cfg.alert_score_threshold = 0.9;
        let f = features(EntityType::Merchant, 0.1, 2);
        let outcome = score_event(&[f], 10.0, "evt2", None, &cfg);
        assert!(outcome.alert.is_none());
    }

    #[test]
    fn email_cross_type_suffix_is_appended() {
        let f = features(EntityType::Email, 0.6, 5);
        let outcome = score_event(&[f], 10.0, "evt3", None, &config());
        let alert = outcome.alert.unwrap();
        assert!(alert.summary.contains("[email cross-type]"));
    }

    #[test]
    fn unusual_amount_compares_current_amount_not_max() {
        let f = features(EntityType::Merchant, 0.0, 5);
        let outcome = score_event(&[f], 25.0, "evt4", None, &config());
        assert!(outcome.signals.contains(&SignalType::UnusualAmount));
    }

    #[test]
    fn high_velocity_by_count_fires_for_email_and_ip_dimensions_too() {
        let mut email_features = features(EntityType::Email, 0.0, 10);
        email_features.count_last_1min = 10;
        let outcome = score_event(&[email_features], 10.0, "evt6", None, &config());
        assert!(outcome.signals.contains(&SignalType::HighEmailVelocity));

        let mut ip_features = features(EntityType::Ip, 0.0, 9);
        ip_features.count_last_1min = 9;
        let outcome = score_event(&[ip_features], 10.0, "evt7", None, &config());
        assert!(!outcome.signals.contains(&SignalType::HighIpVelocity));
    }

    #[test]
    fn ml_score_overrides_merchant_dimension_only() {
        let f = features(EntityType::Merchant, 0.0, 5);
        let outcome = score_event(&[f], 10.0, "evt5", Some(0.95), &config());
        assert!((outcome.final_score - 0.95).abs() < 1e-9);
        let alert = outcome.alert.unwrap();
        assert!(alert.summary.starts_with("[ML]"));
    }
}
