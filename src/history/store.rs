use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::anomaly::types::EnrichedTransaction;

/// Optional bounds for an ad-hoc history query. Every bound that is set must match.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_amount: Option<BigDecimal>,
    pub max_amount: Option<BigDecimal>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl HistoryFilter {
    fn matches(&self, entry: &EnrichedTransaction) -> bool {
        let txn = &entry.transaction;
        self.sender.as_deref().map_or(true, |id| txn.sender.id == id)
            && self.receiver.as_deref().map_or(true, |id| txn.receiver.id == id)
            && self.since.map_or(true, |since| txn.timestamp >= since)
            && self.until.map_or(true, |until| txn.timestamp < until)
            && self.min_amount.as_ref().map_or(true, |min| &txn.amount >= min)
            && self.max_amount.as_ref().map_or(true, |max| &txn.amount <= max)
    }
}

/// Append-only, capacity-bounded ledger of analyzed transactions.
///
/// The stream worker is the only writer. Readers get snapshots (cloned `Arc`s)
/// so they never hold the lock while they work and never see a half-written entry.
pub struct HistoryStore {
    entries: RwLock<VecDeque<Arc<EnrichedTransaction>>>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Push to the back, evicting from the front once over capacity.
    pub fn append(&self, entry: EnrichedTransaction) {
        let entry = Arc::new(entry);
        let mut entries = self.write();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Transactions sent by `sender_id`, optionally only those strictly after `since`.
    pub fn by_sender(
        &self,
        sender_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Arc<EnrichedTransaction>> {
        self.collect(|e| {
            e.transaction.sender.id == sender_id
                && since.map_or(true, |s| e.transaction.timestamp > s)
        })
    }

    /// Transactions received by `receiver_id`, optionally only those strictly after `since`.
    pub fn by_receiver(
        &self,
        receiver_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Vec<Arc<EnrichedTransaction>> {
        self.collect(|e| {
            e.transaction.receiver.id == receiver_id
                && since.map_or(true, |s| e.transaction.timestamp > s)
        })
    }

    /// Transactions with `from <= timestamp < to`.
    pub fn in_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Arc<EnrichedTransaction>> {
        self.collect(|e| e.transaction.timestamp >= from && e.transaction.timestamp < to)
    }

    /// Transactions with `min <= amount <= max`.
    pub fn in_amount_range(&self, min: &BigDecimal, max: &BigDecimal) -> Vec<Arc<EnrichedTransaction>> {
        self.collect(|e| &e.transaction.amount >= min && &e.transaction.amount <= max)
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Arc<EnrichedTransaction>> {
        let entries = self.read();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn find(&self, transaction_id: &str) -> Option<Arc<EnrichedTransaction>> {
        self.read()
            .iter()
            .rev()
            .find(|e| e.transaction.id == transaction_id)
            .cloned()
    }

    pub fn query(&self, filter: &HistoryFilter) -> Vec<Arc<EnrichedTransaction>> {
        let mut matched = self.collect(|e| filter.matches(e));
        if let Some(limit) = filter.limit {
            let excess = matched.len().saturating_sub(limit);
            matched.drain(..excess);
        }
        matched
    }

    fn collect<F>(&self, predicate: F) -> Vec<Arc<EnrichedTransaction>>
    where
        F: Fn(&EnrichedTransaction) -> bool,
    {
        self.read()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    // A panicking reader cannot leave the deque half-modified, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Arc<EnrichedTransaction>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Arc<EnrichedTransaction>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
