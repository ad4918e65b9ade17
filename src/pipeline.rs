use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::anomaly::engine::AnomalyEngine;
use crate::anomaly::types::{Alert, EnrichedTransaction};
use crate::config::StreamConfig;
use crate::ingest::generator::TransactionSource;

/// Events delivered to subscribers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    NewTransaction(Arc<EnrichedTransaction>),
    NewAlert(Alert),
    ConnectionStatus {
        status: String,
        time: DateTime<Utc>,
    },
}

/// Fan-out point between the worker and its subscribers.
///
/// Backed by a bounded broadcast channel: publishing never waits, and a
/// subscriber that falls more than `capacity` events behind loses the oldest ones.
pub struct EventHub {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: StreamEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!("No subscribers to publish to: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// What one loop iteration produced.
#[derive(Debug)]
pub struct StepOutcome {
    pub transaction_id: String,
    pub risk_score: u8,
    pub alerted: bool,
}

/// Drives ingest -> analyze -> publish. Sole owner of the engine, and
/// therefore the only writer to history.
pub struct StreamCoordinator<S> {
    engine: AnomalyEngine,
    source: S,
    hub: Arc<EventHub>,
    config: StreamConfig,
}

impl<S: TransactionSource> StreamCoordinator<S> {
    pub fn new(engine: AnomalyEngine, source: S, hub: Arc<EventHub>, config: StreamConfig) -> Self {
        Self {
            engine,
            source,
            hub,
            config,
        }
    }

    /// Pull one transaction, analyze it and publish the result (plus its alert, if any).
    pub fn step(&mut self) -> eyre::Result<StepOutcome> {
        let transaction = self.source.next_transaction()?;
        let enriched = Arc::new(self.engine.analyze(transaction));

        let outcome = StepOutcome {
            transaction_id: enriched.transaction.id.clone(),
            risk_score: enriched.analysis.risk_score,
            alerted: enriched.analysis.alert.is_some(),
        };

        let alert = enriched.analysis.alert.clone();
        self.hub.publish(StreamEvent::NewTransaction(enriched));
        if let Some(alert) = alert {
            self.hub.publish(StreamEvent::NewAlert(alert));
        }

        Ok(outcome)
    }

    /// Run until `shutdown` is cancelled. A step that has started always
    /// finishes; cancellation is only observed while waiting between steps.
    /// Returns the number of transactions processed.
    pub async fn run(mut self, shutdown: CancellationToken) -> u64 {
        tracing::info!(
            min_delay_ms = self.config.min_delay_ms,
            max_delay_ms = self.config.max_delay_ms,
            "Stream worker started"
        );
        let mut processed = 0u64;

        while !shutdown.is_cancelled() {
            let pause = match self.step() {
                Ok(outcome) => {
                    processed += 1;
                    tracing::debug!(
                        transaction_id = %outcome.transaction_id,
                        risk_score = outcome.risk_score,
                        alerted = outcome.alerted,
                        subscribers = self.hub.subscriber_count(),
                        "Transaction published"
                    );
                    self.pacing_delay()
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        cooldown_ms = self.config.error_cooldown_ms,
                        "Stream iteration failed, cooling down"
                    );
                    Duration::from_millis(self.config.error_cooldown_ms)
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!(processed, "Stream worker stopped");
        processed
    }

    fn pacing_delay(&self) -> Duration {
        let (min, max) = (self.config.min_delay_ms, self.config.max_delay_ms);
        let millis = if min >= max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::engine::tests::StubModel;
    use crate::config::DetectionConfig;
    use crate::ingest::types::{Party, Transaction};
    use bigdecimal::BigDecimal;
    use std::collections::VecDeque;

    /// Replays a fixed script; `None` entries become ingest failures.
    struct ScriptedSource {
        script: VecDeque<Option<Transaction>>,
    }

    impl TransactionSource for ScriptedSource {
        fn next_transaction(&mut self) -> eyre::Result<Transaction> {
            match self.script.pop_front() {
                Some(Some(txn)) => Ok(txn),
                Some(None) => Err(eyre::eyre!("scripted ingest failure")),
                None => Err(eyre::eyre!("source exhausted")),
            }
        }
    }

    fn txn(id: &str, amount: i64, method: &str, sender_location: &str) -> Transaction {
        Transaction {
            id: id.to_string(),
            timestamp: Utc::now(),
            amount: BigDecimal::from(amount),
            currency: "USD".to_string(),
            payment_method: method.to_string(),
            sender: Party::new("CUST_000001", "Jane Smith", sender_location),
            receiver: Party::new("CUST_000002", "John Brown", "London, UK"),
            reference: "REF123456".to_string(),
            status: "Processed".to_string(),
        }
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            min_delay_ms: 1,
            max_delay_ms: 2,
            error_cooldown_ms: 5,
            ..StreamConfig::default()
        }
    }

    fn coordinator(script: Vec<Option<Transaction>>, hub: Arc<EventHub>) -> StreamCoordinator<ScriptedSource> {
        let engine = AnomalyEngine::new(DetectionConfig::default(), StubModel::quiet());
        StreamCoordinator::new(
            engine,
            ScriptedSource {
                script: script.into(),
            },
            hub,
            fast_config(),
        )
    }

    #[test]
    fn test_step_publishes_transaction_and_alert() {
        let hub = Arc::new(EventHub::new(16));
        let mut rx = hub.subscribe();
        let suspicious = txn("T1", 100000, "Cash Deposit", "Tehran, Iran");
        let mut coord = coordinator(vec![Some(suspicious)], hub.clone());

        let outcome = coord.step().unwrap();
        assert_eq!(outcome.transaction_id, "T1");
        assert!(outcome.alerted);

        match rx.try_recv().unwrap() {
            StreamEvent::NewTransaction(enriched) => assert_eq!(enriched.transaction.id, "T1"),
            other => panic!("expected new_transaction, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            StreamEvent::NewAlert(alert) => {
                assert_eq!(alert.transaction_id, "T1");
                assert!(alert.risk_score > 50);
            }
            other => panic!("expected new_alert, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_low_risk_publishes_no_alert() {
        let hub = Arc::new(EventHub::new(16));
        let mut rx = hub.subscribe();
        let mut coord = coordinator(vec![Some(txn("T1", 250, "ACH", "Singapore"))], hub.clone());

        assert!(!coord.step().unwrap().alerted);
        assert!(matches!(rx.try_recv().unwrap(), StreamEvent::NewTransaction(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_does_not_fail() {
        let hub = Arc::new(EventHub::new(4));
        let mut coord = coordinator(vec![Some(txn("T1", 250, "ACH", "Singapore"))], hub.clone());
        assert!(coord.step().is_ok());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_run_survives_errors_and_stops_gracefully() {
        let hub = Arc::new(EventHub::new(16));
        let mut rx = hub.subscribe();
        let script = vec![
            None,
            Some(txn("T1", 250, "ACH", "Singapore")),
            None,
            Some(txn("T2", 300, "ACH", "Singapore")),
        ];
        let coord = coordinator(script, hub.clone());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(coord.run(shutdown.clone()));

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("worker should keep publishing after failures")
                .unwrap();
            if let StreamEvent::NewTransaction(enriched) = event {
                seen.push(enriched.transaction.id.clone());
            }
        }
        assert_eq!(seen, vec!["T1", "T2"]);

        shutdown.cancel();
        let processed = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop after cancellation")
            .unwrap();
        assert_eq!(processed, 2);
    }

    #[test]
    fn test_event_serialization() {
        let event = StreamEvent::ConnectionStatus {
            status: "connected".to_string(),
            time: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connection_status");
        assert_eq!(json["data"]["status"], "connected");
    }
}
