use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;

use crate::anomaly::types::EnrichedTransaction;
use crate::history::store::HistoryFilter;
use crate::ingest::types::parse_timestamp;

use super::types::*;
use super::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
type ApiError = (StatusCode, Json<ErrorResponse>);

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
}

fn parse_filter(params: TransactionParams) -> Result<HistoryFilter, ApiError> {
    let timestamp = |name: &str, raw: Option<String>| {
        raw.map(|s| {
            parse_timestamp(&s)
                .ok_or_else(|| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        format!("Invalid {} timestamp: {}", name, s),
                    )
                })
        })
        .transpose()
    };
    let amount = |name: &str, raw: Option<String>| {
        raw.map(|s| {
            BigDecimal::from_str(&s)
                .map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("Invalid {}: {}", name, e))
                })
        })
        .transpose()
    };

    Ok(HistoryFilter {
        since: timestamp("since", params.since)?,
        until: timestamp("until", params.until)?,
        min_amount: amount("min_amount", params.min_amount)?,
        max_amount: amount("max_amount", params.max_amount)?,
        sender: params.sender,
        receiver: params.receiver,
        limit: Some(params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)),
    })
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        time: Utc::now(),
        processed: state.history.len(),
        active_clients: state.hub.subscriber_count(),
    })
}

// ============================================================
// Transactions
// ============================================================

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionParams>,
) -> ApiResult<TransactionsResponse> {
    let filter = parse_filter(params)?;
    let transactions = state.history.query(&filter);
    Ok(Json(TransactionsResponse {
        count: transactions.len(),
        transactions,
    }))
}

pub async fn transaction_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Arc<EnrichedTransaction>> {
    state
        .history
        .find(&id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Transaction {} not found", id)))
}

// ============================================================
// Alerts
// ============================================================

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertParams>,
) -> ApiResult<AlertsResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let mut alerts: Vec<_> = state
        .history
        .recent(state.history.capacity())
        .iter()
        .rev()
        .filter_map(|e| e.analysis.alert.clone())
        .take(limit)
        .collect();
    // Oldest first, matching the transaction listing
    alerts.reverse();
    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}
