use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{
    LargeCashConfig, LayeringConfig, RoundAmountConfig, SmurfingConfig, StructuringConfig,
    VelocityConfig,
};
use crate::ingest::types::Transaction;

use super::types::{EnrichedTransaction, PatternHit, PatternType};

type History = [Arc<EnrichedTransaction>];

/// Several transactions from one sender sitting just under the reporting threshold.
pub fn check_structuring(
    transaction: &Transaction,
    sender_history: &History,
    now: DateTime<Utc>,
    config: &StructuringConfig,
) -> Option<PatternHit> {
    let lower = BigDecimal::from(config.lower);
    let upper = BigDecimal::from(config.upper);
    let in_band = |amount: &BigDecimal| amount >= &lower && amount < &upper;

    if !in_band(&transaction.amount) {
        return None;
    }

    let cutoff = now - Duration::days(config.window_days);
    let recent_similar = sender_history
        .iter()
        .filter(|e| in_band(&e.transaction.amount) && e.transaction.timestamp > cutoff)
        .count();

    if recent_similar >= config.min_prior {
        return Some(PatternHit::new(
            PatternType::Structuring,
            format!(
                "{} transactions near ${}k in last {} days",
                recent_similar,
                config.upper / 1000,
                config.window_days
            ),
        ));
    }

    None
}

/// Funds routed through many distinct locations over the sender's recent transactions.
pub fn check_layering(sender_history: &History, config: &LayeringConfig) -> Option<PatternHit> {
    if sender_history.len() < config.min_history {
        return None;
    }

    let skip = sender_history.len().saturating_sub(config.lookback);
    let locations: HashSet<&str> = sender_history[skip..]
        .iter()
        .flat_map(|e| {
            [
                e.transaction.sender.location.as_str(),
                e.transaction.receiver.location.as_str(),
            ]
        })
        .collect();

    if locations.len() >= config.min_locations {
        return Some(PatternHit::new(
            PatternType::Layering,
            format!("Complex routing across {} locations", locations.len()),
        ));
    }

    None
}

/// Many similar amounts converging on one receiver from other senders.
pub fn check_smurfing(
    transaction: &Transaction,
    receiver_history: &History,
    config: &SmurfingConfig,
) -> Option<PatternHit> {
    let tolerance = BigDecimal::from(config.amount_tolerance);
    let cutoff = transaction.timestamp - Duration::hours(config.window_hours);

    let similar = receiver_history
        .iter()
        .filter(|e| {
            let prior = &e.transaction;
            prior.receiver.id == transaction.receiver.id
                && (&prior.amount - &transaction.amount).abs() < tolerance
                && prior.timestamp > cutoff
                && prior.sender.id != transaction.sender.id
        })
        .count();

    if similar >= config.min_matches {
        return Some(PatternHit::new(
            PatternType::Smurfing,
            format!("{} similar txns from different senders", similar),
        ));
    }

    None
}

/// Either party located in a high-risk jurisdiction. The first listed match wins.
pub fn check_geographic_risk(
    transaction: &Transaction,
    high_risk_locations: &[String],
) -> Option<PatternHit> {
    high_risk_locations
        .iter()
        .filter(|loc| !loc.is_empty())
        .find(|loc| {
            transaction.sender.location.contains(loc.as_str())
                || transaction.receiver.location.contains(loc.as_str())
        })
        .map(|loc| PatternHit::new(PatternType::GeographicRisk, format!("Involving {}", loc)))
}

pub fn check_large_cash(transaction: &Transaction, config: &LargeCashConfig) -> Option<PatternHit> {
    let is_cash = transaction.payment_method.to_lowercase().contains("cash");
    if !is_cash || transaction.amount <= BigDecimal::from(config.threshold) {
        return None;
    }

    Some(PatternHit::new(
        PatternType::LargeCash,
        format!("Cash txn {}", format_usd(&transaction.amount)),
    ))
}

/// Count of the sender's transactions inside the rolling velocity window.
pub fn velocity_count(sender_history: &History, now: DateTime<Utc>, config: &VelocityConfig) -> usize {
    let cutoff = now - Duration::seconds(config.window_secs);
    sender_history
        .iter()
        .filter(|e| e.transaction.timestamp > cutoff)
        .count()
}

pub fn check_velocity(count: usize, config: &VelocityConfig) -> Option<PatternHit> {
    if count > config.max_transactions {
        let window = if config.window_secs == 3600 {
            "last hour".to_string()
        } else {
            format!("last {}s", config.window_secs)
        };
        return Some(PatternHit::new(
            PatternType::Velocity,
            format!("{} txns in {}", count, window),
        ));
    }

    None
}

/// Large, exactly round amounts. Small round amounts are ordinary and not flagged.
pub fn check_round_amount(
    transaction: &Transaction,
    config: &RoundAmountConfig,
) -> Option<PatternHit> {
    if transaction.amount <= BigDecimal::from(config.min_amount)
        || !is_multiple_of(&transaction.amount, config.multiple)
    {
        return None;
    }

    Some(PatternHit::new(
        PatternType::RoundAmount,
        format!("Round amount {}", format_usd(&transaction.amount)),
    ))
}

// ============================================================
// Amount helpers
// ============================================================

/// Convert an exact amount to `f64`, rejecting values with no finite representation.
pub fn amount_to_f64(amount: &BigDecimal) -> eyre::Result<f64> {
    amount
        .to_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| eyre::eyre!("Amount {} is not representable as f64", amount))
}

pub fn is_multiple_of(amount: &BigDecimal, multiple: u64) -> bool {
    if multiple == 0 {
        return false;
    }
    (amount % &BigDecimal::from(multiple)).is_zero()
}

/// `$1,234,567.89`, rounded half-up to cents. Works on the exact decimal,
/// so amounts far outside `f64` range still format.
pub fn format_usd(amount: &BigDecimal) -> String {
    let (cents, _) = amount
        .with_scale_round(2, RoundingMode::HalfUp)
        .as_bigint_and_exponent();
    let raw = cents.to_string();
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(digits) => ("-", digits),
        None => ("", raw.as_str()),
    };
    let padded = format!("{:0>3}", digits);
    let (whole, fraction) = padded.split_at(padded.len() - 2);

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{}${}.{}", sign, grouped, fraction)
}
