use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One side of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Party {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Free text, matched by substring against the high-risk location list.
    #[serde(default)]
    pub location: String,
}

impl Party {
    pub fn new(id: impl Into<String>, name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
        }
    }
}

/// An incoming transaction. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(deserialize_with = "non_negative_amount")]
    pub amount: BigDecimal,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub payment_method: String,
    pub sender: Party,
    pub receiver: Party,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub status: String,
}

/// Parse an ISO-8601 timestamp. Accepts RFC 3339 and naive
/// `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Malformed or null timestamps resolve to "now" instead of failing the record.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref().and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            tracing::warn!(raw = ?raw, "Unparsable transaction timestamp, substituting current time");
            Utc::now()
        }
    })
}

fn non_negative_amount<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    let amount = BigDecimal::deserialize(deserializer)?;
    if amount < BigDecimal::zero() {
        return Err(serde::de::Error::custom(format!(
            "amount must be non-negative, got {}",
            amount
        )));
    }
    Ok(amount)
}
