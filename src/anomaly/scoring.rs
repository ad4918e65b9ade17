use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use chrono::{DateTime, Utc};

use crate::ingest::generator::short_id;

use super::types::{Alert, DetectedPattern, RiskLevel};

/// Scores above this produce an alert (i.e. High and Critical).
pub const ALERT_THRESHOLD: u8 = 50;

/// Amount-derived component: 10 points per 100k, capped at 10.
pub fn base_risk(amount: &BigDecimal) -> f64 {
    if *amount >= BigDecimal::from(100_000) {
        return 10.0;
    }
    if *amount <= BigDecimal::zero() {
        return 0.0;
    }
    // Strictly inside (0, 100k) here, so the conversion is finite
    let amount = amount.to_f64().unwrap_or(0.0);
    (amount / 100_000.0 * 10.0).clamp(0.0, 10.0)
}

/// `clamp(round(base + sum(severity)), 0, 100)`
pub fn risk_score(amount: &BigDecimal, patterns: &[DetectedPattern]) -> u8 {
    let pattern_risk: u32 = patterns.iter().map(|p| p.score).sum();
    let total = base_risk(amount) + pattern_risk as f64;
    total.round().clamp(0.0, 100.0) as u8
}

/// An alert for every score above [`ALERT_THRESHOLD`], carrying the full pattern list.
pub fn build_alert(
    transaction_id: &str,
    score: u8,
    patterns: &[DetectedPattern],
    now: DateTime<Utc>,
) -> Option<Alert> {
    if score <= ALERT_THRESHOLD {
        return None;
    }
    Some(Alert {
        id: format!("ALERT_{}", short_id()),
        transaction_id: transaction_id.to_string(),
        risk_score: score,
        risk_level: RiskLevel::from_score(score),
        patterns: patterns.to_vec(),
        timestamp: now,
    })
}
