use bigdecimal::BigDecimal;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::types::{Party, Transaction};

/// Anything that can hand the stream worker its next transaction.
pub trait TransactionSource: Send {
    fn next_transaction(&mut self) -> eyre::Result<Transaction>;
}

const CURRENCIES: [&str; 8] = ["USD", "EUR", "GBP", "JPY", "CAD", "AUD", "CHF", "CNY"];
const METHODS: [&str; 5] = [
    "Wire Transfer",
    "Cash Deposit",
    "ACH",
    "Credit Card",
    "Cryptocurrency",
];
const SUSPICIOUS_METHODS: [&str; 2] = ["Cash Deposit", "Wire Transfer"];
const LOCATIONS: [&str; 5] = [
    "New York, USA",
    "London, UK",
    "Dubai, UAE",
    "Singapore",
    "Zurich, Switzerland",
];
const HIGH_RISK_LOCATIONS: [&str; 5] = ["North Korea", "Iran", "Afghanistan", "Myanmar", "Syria"];
const SUSPICIOUS_AMOUNTS: [i64; 4] = [9500, 15000, 50000, 100000];
const FIRST_NAMES: [&str; 6] = ["John", "Jane", "Michael", "Sarah", "David", "Emma"];
const LAST_NAMES: [&str; 6] = ["Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia"];
const CUSTOMER_COUNT: u32 = 500;

/// Synthetic transaction feed. A configurable fraction of records is shaped
/// to look like laundering activity so the detectors have something to find.
pub struct SyntheticGenerator {
    rng: StdRng,
    customers: Vec<String>,
    suspicious_fraction: f64,
}

impl SyntheticGenerator {
    pub fn new(suspicious_fraction: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), suspicious_fraction)
    }

    pub fn seeded(seed: u64, suspicious_fraction: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), suspicious_fraction)
    }

    fn with_rng(rng: StdRng, suspicious_fraction: f64) -> Self {
        let customers = (1..=CUSTOMER_COUNT)
            .map(|i| format!("CUST_{:06}", i))
            .collect();
        Self {
            rng,
            customers,
            suspicious_fraction: suspicious_fraction.clamp(0.0, 1.0),
        }
    }

    pub fn generate(&mut self, suspicious: bool) -> Transaction {
        let sender_idx = self.rng.gen_range(0..self.customers.len());
        // Offset by at least one so the receiver is never the sender
        let offset = self.rng.gen_range(1..self.customers.len());
        let receiver_idx = (sender_idx + offset) % self.customers.len();

        let (amount, method, sender_loc, receiver_loc) = if suspicious {
            let risky: Vec<&str> = HIGH_RISK_LOCATIONS.iter().chain(LOCATIONS.iter()).copied().collect();
            (
                BigDecimal::from(*pick(&mut self.rng, &SUSPICIOUS_AMOUNTS)),
                *pick(&mut self.rng, &SUSPICIOUS_METHODS),
                *pick(&mut self.rng, &risky),
                *pick(&mut self.rng, &LOCATIONS),
            )
        } else {
            let cents = self.rng.gen_range(10_000i64..=1_000_000);
            (
                BigDecimal::new(cents.into(), 2),
                *pick(&mut self.rng, &METHODS),
                *pick(&mut self.rng, &LOCATIONS),
                *pick(&mut self.rng, &LOCATIONS),
            )
        };

        let sender_name = self.name();
        let receiver_name = self.name();

        Transaction {
            id: format!("TXN_{}", short_id()),
            timestamp: Utc::now(),
            amount,
            currency: pick(&mut self.rng, &CURRENCIES).to_string(),
            payment_method: method.to_string(),
            sender: Party::new(self.customers[sender_idx].clone(), sender_name, sender_loc),
            receiver: Party::new(self.customers[receiver_idx].clone(), receiver_name, receiver_loc),
            reference: format!("REF{}", self.rng.gen_range(100_000..=999_999)),
            status: "Processed".to_string(),
        }
    }

    fn name(&mut self) -> String {
        format!(
            "{} {}",
            pick(&mut self.rng, &FIRST_NAMES),
            pick(&mut self.rng, &LAST_NAMES)
        )
    }
}

impl TransactionSource for SyntheticGenerator {
    fn next_transaction(&mut self) -> eyre::Result<Transaction> {
        let suspicious = self.rng.gen_bool(self.suspicious_fraction);
        Ok(self.generate(suspicious))
    }
}

fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> &'a T {
    // Every slice passed here is a non-empty constant
    &items[rng.gen_range(0..items.len())]
}

/// Eight upper-case hex characters from a fresh v4 UUID.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_transaction_shape() {
        let mut gen = SyntheticGenerator::seeded(7, 0.0);
        for _ in 0..50 {
            let txn = gen.next_transaction().unwrap();
            assert!(txn.id.starts_with("TXN_"));
            assert_eq!(txn.id.len(), 12);
            assert_ne!(txn.sender.id, txn.receiver.id);
            assert!(txn.amount >= BigDecimal::from(100));
            assert!(txn.amount <= BigDecimal::from(10000));
            assert!(txn.reference.starts_with("REF"));
            assert_eq!(txn.status, "Processed");
            assert!(LOCATIONS.contains(&txn.sender.location.as_str()));
        }
    }

    #[test]
    fn test_suspicious_transactions_use_flagged_amounts() {
        let mut gen = SyntheticGenerator::seeded(11, 1.0);
        for _ in 0..50 {
            let txn = gen.next_transaction().unwrap();
            assert!(SUSPICIOUS_AMOUNTS
                .iter()
                .any(|a| txn.amount == BigDecimal::from(*a)));
            assert!(SUSPICIOUS_METHODS.contains(&txn.payment_method.as_str()));
        }
    }

    #[test]
    fn test_short_id_format() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
