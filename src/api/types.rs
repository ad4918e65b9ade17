use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::anomaly::types::{Alert, EnrichedTransaction};

// ============================================================
// Query params
// ============================================================

#[derive(Debug, Deserialize, Default)]
pub struct TransactionParams {
    pub sender: Option<String>,
    pub receiver: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub min_amount: Option<String>,
    pub max_amount: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AlertParams {
    pub limit: Option<usize>,
}

// ============================================================
// Response types
// ============================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: DateTime<Utc>,
    /// Transactions currently held in history (bounded by its capacity).
    pub processed: usize,
    pub active_clients: usize,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub count: usize,
    pub transactions: Vec<Arc<EnrichedTransaction>>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub count: usize,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
