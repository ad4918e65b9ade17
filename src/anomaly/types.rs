use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::Transaction;

/// Patterns the engine can detect, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternType {
    #[serde(rename = "Structuring")]
    Structuring,
    #[serde(rename = "Layering")]
    Layering,
    #[serde(rename = "Smurfing")]
    Smurfing,
    #[serde(rename = "Geographic Risk")]
    GeographicRisk,
    #[serde(rename = "Large Cash")]
    LargeCash,
    #[serde(rename = "Velocity")]
    Velocity,
    #[serde(rename = "Round Amount")]
    RoundAmount,
    #[serde(rename = "ML Anomaly")]
    MlAnomaly,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structuring => "Structuring",
            Self::Layering => "Layering",
            Self::Smurfing => "Smurfing",
            Self::GeographicRisk => "Geographic Risk",
            Self::LargeCash => "Large Cash",
            Self::Velocity => "Velocity",
            Self::RoundAmount => "Round Amount",
            Self::MlAnomaly => "ML Anomaly",
        }
    }

    /// Points this pattern adds to the risk score when it fires.
    pub fn severity(&self) -> u32 {
        match self {
            Self::Structuring => 25,
            Self::Layering => 30,
            Self::Smurfing => 25,
            Self::GeographicRisk => 20,
            Self::LargeCash => 15,
            Self::Velocity => 20,
            Self::RoundAmount => 10,
            Self::MlAnomaly => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// 0-25 Low, 26-50 Medium, 51-75 High, 76-100 Critical.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=25 => Self::Low,
            26..=50 => Self::Medium,
            51..=75 => Self::High,
            _ => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }
}

/// A detector that fired, before it is turned into a scored record.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternHit {
    pub pattern: PatternType,
    pub evidence: String,
}

impl PatternHit {
    pub fn new(pattern: PatternType, evidence: impl Into<String>) -> Self {
        Self {
            pattern,
            evidence: evidence.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    pub description: String,
    pub score: u32,
}

impl From<PatternHit> for DetectedPattern {
    fn from(hit: PatternHit) -> Self {
        Self {
            pattern_type: hit.pattern,
            score: hit.pattern.severity(),
            description: hit.evidence,
        }
    }
}

/// A signal that could not be evaluated and contributed nothing to the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedSignal {
    pub signal: PatternType,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub transaction_id: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub patterns: Vec<DetectedPattern>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub transaction_id: String,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub detected_patterns: Vec<DetectedPattern>,
    #[serde(default)]
    pub alert: Option<Alert>,
    pub ml_anomaly_score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_signals: Vec<DegradedSignal>,
}

impl AnalysisResult {
    pub fn has_pattern(&self, pattern: PatternType) -> bool {
        self.detected_patterns
            .iter()
            .any(|p| p.pattern_type == pattern)
    }
}

/// A transaction together with its analysis. This is what history stores
/// and what subscribers receive, serialized as one flat object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTransaction {
    #[serde(flatten)]
    pub transaction: Transaction,
    #[serde(flatten)]
    pub analysis: AnalysisResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(25), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(26), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(51), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(75), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(76), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn test_detected_pattern_serialization() {
        let pattern = DetectedPattern::from(PatternHit::new(
            PatternType::GeographicRisk,
            "Involving Iran",
        ));
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["type"], "Geographic Risk");
        assert_eq!(json["description"], "Involving Iran");
        assert_eq!(json["score"], 20);
    }
}
