use chrono::{Datelike, Timelike};

use crate::ingest::types::Transaction;

use super::rules::{amount_to_f64, is_multiple_of};

pub const FEATURE_COUNT: usize = 5;

/// Model input: `[amount, hour_of_day, day_of_week (Mon = 0), is_round_thousand, velocity_last_hour]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn extract(txn: &Transaction, velocity: usize) -> eyre::Result<Self> {
        let amount = amount_to_f64(&txn.amount)?;
        if amount < 0.0 {
            return Err(eyre::eyre!(
                "Negative amount {} on transaction {}",
                txn.amount,
                txn.id
            ));
        }
        let round_thousand = if is_multiple_of(&txn.amount, 1000) { 1.0 } else { 0.0 };

        Ok(Self([
            amount,
            txn.timestamp.hour() as f64,
            txn.timestamp.weekday().num_days_from_monday() as f64,
            round_thousand,
            velocity as f64,
        ]))
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }
}
