use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::DetectionConfig;
use crate::history::store::HistoryStore;
use crate::ingest::types::Transaction;

use super::features::FeatureVector;
use super::model::{ModelScore, RiskModel};
use super::rules;
use super::scoring;
use super::types::{
    AnalysisResult, DegradedSignal, DetectedPattern, EnrichedTransaction, PatternHit, PatternType,
    RiskLevel,
};

/// The detection engine. Owns the history it writes to and the model it consults.
///
/// `analyze` takes `&mut self`, so whoever holds the engine is the only writer;
/// readers get a shared handle from [`AnomalyEngine::history`].
pub struct AnomalyEngine {
    config: DetectionConfig,
    history: Arc<HistoryStore>,
    model: Arc<dyn RiskModel>,
}

impl AnomalyEngine {
    pub fn new(config: DetectionConfig, model: Arc<dyn RiskModel>) -> Self {
        let history = Arc::new(HistoryStore::new(config.history_capacity));
        Self {
            config,
            history,
            model,
        }
    }

    pub fn history(&self) -> Arc<HistoryStore> {
        self.history.clone()
    }

    pub fn analyze(&mut self, transaction: Transaction) -> EnrichedTransaction {
        self.analyze_at(transaction, Utc::now())
    }

    /// Run every detector against the pre-insertion history, score the
    /// result, then append it. `now` anchors the sender-side rolling windows.
    pub fn analyze_at(&mut self, transaction: Transaction, now: DateTime<Utc>) -> EnrichedTransaction {
        let analysis = self.evaluate(&transaction, now);

        let enriched = EnrichedTransaction {
            transaction,
            analysis,
        };
        self.history.append(enriched.clone());
        enriched
    }

    fn evaluate(&self, transaction: &Transaction, now: DateTime<Utc>) -> AnalysisResult {
        let config = &self.config;
        let sender_history = self.history.by_sender(&transaction.sender.id, None);
        let receiver_history = self.history.by_receiver(
            &transaction.receiver.id,
            Some(transaction.timestamp - Duration::hours(config.smurfing.window_hours)),
        );
        let velocity = rules::velocity_count(&sender_history, now, &config.velocity);

        let mut verdicts = Verdicts::new(&transaction.id);

        // Rule order is part of the output contract
        verdicts.record(
            PatternType::Structuring,
            Ok(rules::check_structuring(
                transaction,
                &sender_history,
                now,
                &config.structuring,
            )),
        );
        verdicts.record(
            PatternType::Layering,
            Ok(rules::check_layering(&sender_history, &config.layering)),
        );
        verdicts.record(
            PatternType::Smurfing,
            Ok(rules::check_smurfing(
                transaction,
                &receiver_history,
                &config.smurfing,
            )),
        );
        verdicts.record(
            PatternType::GeographicRisk,
            Ok(rules::check_geographic_risk(
                transaction,
                &config.high_risk_locations,
            )),
        );
        verdicts.record(
            PatternType::LargeCash,
            Ok(rules::check_large_cash(transaction, &config.large_cash)),
        );
        verdicts.record(
            PatternType::Velocity,
            Ok(rules::check_velocity(velocity, &config.velocity)),
        );
        verdicts.record(
            PatternType::RoundAmount,
            Ok(rules::check_round_amount(transaction, &config.round_amount)),
        );

        let ml_anomaly_score = match self.score_model(transaction, velocity) {
            Ok(score) => {
                let hit = score.is_anomaly.then(|| {
                    PatternHit::new(
                        PatternType::MlAnomaly,
                        format!("Anomaly score {:.3}", score.score),
                    )
                });
                verdicts.record(PatternType::MlAnomaly, Ok(hit));
                score.score
            }
            Err(e) => {
                verdicts.record(PatternType::MlAnomaly, Err(e));
                0.0
            }
        };

        let risk_score = scoring::risk_score(&transaction.amount, &verdicts.patterns);
        let alert = scoring::build_alert(&transaction.id, risk_score, &verdicts.patterns, now);

        if let Some(alert) = &alert {
            tracing::warn!(
                transaction_id = %transaction.id,
                alert_id = %alert.id,
                risk_score,
                risk_level = alert.risk_level.as_str(),
                patterns = verdicts.patterns.len(),
                "HIGH RISK TRANSACTION"
            );
        } else {
            tracing::debug!(transaction_id = %transaction.id, risk_score, "Transaction analyzed");
        }

        AnalysisResult {
            transaction_id: transaction.id.clone(),
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            detected_patterns: verdicts.patterns,
            alert,
            ml_anomaly_score,
            degraded_signals: verdicts.degraded,
        }
    }

    fn score_model(
        &self,
        transaction: &Transaction,
        velocity: usize,
    ) -> eyre::Result<ModelScore> {
        let features = FeatureVector::extract(transaction, velocity)?;
        self.model.score(&features)
    }
}

/// Accumulates detector outcomes in evaluation order. A failed detector is
/// logged and recorded as degraded; it never stops the remaining ones.
struct Verdicts<'a> {
    transaction_id: &'a str,
    patterns: Vec<DetectedPattern>,
    degraded: Vec<DegradedSignal>,
}

impl<'a> Verdicts<'a> {
    fn new(transaction_id: &'a str) -> Self {
        Self {
            transaction_id,
            patterns: Vec::new(),
            degraded: Vec::new(),
        }
    }

    fn record(&mut self, signal: PatternType, outcome: eyre::Result<Option<PatternHit>>) {
        match outcome {
            Ok(Some(hit)) => self.patterns.push(hit.into()),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    transaction_id = %self.transaction_id,
                    signal = signal.as_str(),
                    error = %e,
                    "Detector failed, contributing nothing"
                );
                self.degraded.push(DegradedSignal {
                    signal,
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingest::types::Party;
    use bigdecimal::BigDecimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed-output model so engine tests do not depend on the trained forest.
    pub(crate) struct StubModel {
        pub(crate) score: f64,
        pub(crate) is_anomaly: bool,
    }

    impl StubModel {
        pub(crate) fn quiet() -> Arc<dyn RiskModel> {
            Arc::new(Self {
                score: 0.12,
                is_anomaly: false,
            })
        }
    }

    impl RiskModel for StubModel {
        fn score(&self, _features: &FeatureVector) -> eyre::Result<ModelScore> {
            Ok(ModelScore {
                score: self.score,
                is_anomaly: self.is_anomaly,
            })
        }
    }

    struct FailingModel {
        calls: AtomicUsize,
    }

    impl RiskModel for FailingModel {
        fn score(&self, _features: &FeatureVector) -> eyre::Result<ModelScore> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(eyre::eyre!("model unavailable"))
        }
    }

    fn engine_with(model: Arc<dyn RiskModel>) -> AnomalyEngine {
        AnomalyEngine::new(DetectionConfig::default(), model)
    }

    fn quiet_engine() -> AnomalyEngine {
        engine_with(StubModel::quiet())
    }

    fn txn(id: &str, sender: &str, receiver: &str, amount: i64, timestamp: DateTime<Utc>) -> Transaction {
        Transaction {
            id: id.to_string(),
            timestamp,
            amount: BigDecimal::from(amount),
            currency: "USD".to_string(),
            payment_method: "Wire Transfer".to_string(),
            sender: Party::new(sender, "Jane Smith", "London, UK"),
            receiver: Party::new(receiver, "John Brown", "Singapore"),
            reference: "REF100000".to_string(),
            status: "Processed".to_string(),
        }
    }

    fn types(result: &AnalysisResult) -> Vec<PatternType> {
        result.detected_patterns.iter().map(|p| p.pattern_type).collect()
    }

    #[test]
    fn test_clean_transaction_scores_low() {
        let mut engine = quiet_engine();
        let now = Utc::now();
        let result = engine.analyze_at(txn("T1", "A", "B", 2500, now), now);

        assert!(result.analysis.detected_patterns.is_empty());
        assert_eq!(result.analysis.risk_score, 0);
        assert_eq!(result.analysis.risk_level, RiskLevel::Low);
        assert!(result.analysis.alert.is_none());
        assert_eq!(result.analysis.ml_anomaly_score, 0.12);
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_detector_never_sees_current_transaction() {
        let mut engine = quiet_engine();
        let now = Utc::now();
        // Two prior in-band transactions; the current one would make three
        engine.analyze_at(txn("T1", "A", "B", 9100, now), now);
        engine.analyze_at(txn("T2", "A", "C", 9200, now), now);
        let third = engine.analyze_at(txn("T3", "A", "D", 9300, now), now);
        assert!(!third.analysis.has_pattern(PatternType::Structuring));

        let fourth = engine.analyze_at(txn("T4", "A", "E", 9500, now), now);
        assert!(fourth.analysis.has_pattern(PatternType::Structuring));
        let structuring = &fourth.analysis.detected_patterns[0];
        assert_eq!(structuring.score, 25);
        assert!(structuring.description.contains('3'));
        assert_eq!(engine.history().len(), 4);
    }

    #[test]
    fn test_velocity_after_eleven_in_an_hour() {
        let mut engine = quiet_engine();
        let now = Utc::now();
        for i in 0..11 {
            let result = engine.analyze_at(txn(&format!("T{}", i), "A", "B", 100, now), now);
            assert!(!result.analysis.has_pattern(PatternType::Velocity));
        }
        let result = engine.analyze_at(txn("T11", "A", "B", 100, now), now);
        assert_eq!(types(&result.analysis), vec![PatternType::Velocity]);
        assert_eq!(result.analysis.detected_patterns[0].description, "11 txns in last hour");
    }

    #[test]
    fn test_patterns_keep_evaluation_order() {
        let mut engine = engine_with(Arc::new(StubModel {
            score: -0.2,
            is_anomaly: true,
        }));
        let now = Utc::now();
        let mut t = txn("T1", "A", "B", 100000, now);
        t.payment_method = "Cash Deposit".to_string();
        t.sender.location = "Tehran, Iran".to_string();

        let result = engine.analyze_at(t, now);
        assert_eq!(
            types(&result.analysis),
            vec![
                PatternType::GeographicRisk,
                PatternType::LargeCash,
                PatternType::RoundAmount,
                PatternType::MlAnomaly,
            ]
        );
        // 10 base + 20 + 15 + 10 + 20
        assert_eq!(result.analysis.risk_score, 75);
        assert_eq!(result.analysis.risk_level, RiskLevel::High);
        let alert = result.analysis.alert.as_ref().expect("score above 50 must alert");
        assert_eq!(alert.transaction_id, "T1");
        assert_eq!(alert.patterns.len(), 4);
        assert_eq!(result.analysis.detected_patterns[3].description, "Anomaly score -0.200");
    }

    #[test]
    fn test_model_failure_degrades_gracefully() {
        let model = Arc::new(FailingModel {
            calls: AtomicUsize::new(0),
        });
        let mut engine = engine_with(model.clone());
        let now = Utc::now();
        let mut t = txn("T1", "A", "B", 60000, now);
        t.payment_method = "Cash".to_string();
        t.receiver.location = "Kabul, Afghanistan".to_string();

        let result = engine.analyze_at(t, now);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            types(&result.analysis),
            vec![
                PatternType::GeographicRisk,
                PatternType::LargeCash,
                PatternType::RoundAmount,
            ]
        );
        assert_eq!(result.analysis.ml_anomaly_score, 0.0);
        assert!(!result.analysis.has_pattern(PatternType::MlAnomaly));
        assert_eq!(result.analysis.degraded_signals.len(), 1);
        assert_eq!(result.analysis.degraded_signals[0].signal, PatternType::MlAnomaly);
        // 6 base + 20 + 15 + 10
        assert_eq!(result.analysis.risk_score, 51);
        assert!(result.analysis.alert.is_some());
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_feature_failure_degrades_gracefully() {
        let mut engine = quiet_engine();
        let now = Utc::now();
        let mut t = txn("T1", "A", "B", 0, now);
        t.amount = "-250".parse().unwrap();

        let result = engine.analyze_at(t, now);
        assert_eq!(result.analysis.ml_anomaly_score, 0.0);
        assert_eq!(result.analysis.degraded_signals.len(), 1);
        assert_eq!(result.analysis.risk_score, 0);
    }

    #[test]
    fn test_amount_beyond_f64_range_still_scores() {
        let mut engine = quiet_engine();
        let now = Utc::now();
        let mut t = txn("T1", "A", "B", 0, now);
        t.amount = "1e400".parse().unwrap();
        t.payment_method = "Cash Deposit".to_string();

        let result = engine.analyze_at(t, now);
        assert_eq!(
            types(&result.analysis),
            vec![PatternType::LargeCash, PatternType::RoundAmount]
        );
        // Only the model cannot take an amount this large
        assert_eq!(result.analysis.degraded_signals.len(), 1);
        assert_eq!(result.analysis.degraded_signals[0].signal, PatternType::MlAnomaly);
        // 10 base + 15 + 10
        assert_eq!(result.analysis.risk_score, 35);
    }

    #[test]
    fn test_alert_timestamp_uses_analysis_time() {
        let mut engine = quiet_engine();
        let now = Utc::now() - Duration::days(3);
        let mut t = txn("T1", "A", "B", 100000, now);
        t.payment_method = "Cash".to_string();
        t.receiver.location = "Aleppo, Syria".to_string();

        let result = engine.analyze_at(t, now);
        let alert = result.analysis.alert.as_ref().expect("score 55 must alert");
        assert_eq!(alert.timestamp, now);
    }

    #[test]
    fn test_score_of_fifty_does_not_alert() {
        let mut engine = quiet_engine();
        let now = Utc::now();
        // Base 0 (amount 0 rounds away), Geographic 20 + Layering 30 = 50
        for (i, loc) in ["Oslo", "Lima", "Cairo", "Quito"].iter().enumerate() {
            let mut prior = txn(&format!("P{}", i), "A", &format!("R{}", i), 10, now);
            prior.receiver.location = loc.to_string();
            engine.analyze_at(prior, now);
        }
        let mut t = txn("T", "A", "Z", 10, now);
        t.receiver.location = "Yangon, Myanmar".to_string();
        let result = engine.analyze_at(t, now);

        assert_eq!(
            types(&result.analysis),
            vec![PatternType::Layering, PatternType::GeographicRisk]
        );
        assert_eq!(result.analysis.risk_score, 50);
        assert_eq!(result.analysis.risk_level, RiskLevel::Medium);
        assert!(result.analysis.alert.is_none());
    }

    #[test]
    fn test_score_always_within_bounds() {
        let mut engine = engine_with(Arc::new(StubModel {
            score: -0.5,
            is_anomaly: true,
        }));
        let now = Utc::now();
        for i in 0..30 {
            let mut t = txn(&format!("T{}", i), "A", "R", 100000, now);
            t.payment_method = "Cash Deposit".to_string();
            t.sender.location = format!("Iran {}", i);
            let result = engine.analyze_at(t, now);
            assert!(result.analysis.risk_score <= 100);
            assert_eq!(
                result.analysis.risk_level,
                RiskLevel::from_score(result.analysis.risk_score)
            );
        }
    }
}
