//! Standalone ledger service.
//!
//! Serves an in-memory hash chain over the JSON API that
//! [`RpcLedger`](dal_coordination::RpcLedger) speaks:
//!
//! - `POST /entries {payload}` - append, returns the linked entry
//! - `GET /entries/:id` - a sealed entry, 404 if unknown
//! - `GET /entries` - all sealed entries in chain order
//! - `GET /blocks?limit=` - newest blocks first
//! - `GET /status`, `GET /health`, `POST /reset`

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use dal_coordination::ledger::{BlockInfo, ChainStatus, LedgerBackend, LedgerEntry, MemoryLedger};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::dto::LimitQuery;
use crate::api::{handlers, with_common_layers, ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    pub payload: Value,
}

/// Build the ledger service router over `ledger`
pub fn create_ledger_router(ledger: Arc<MemoryLedger>) -> Router {
    let router = Router::new()
        .route("/entries", post(append).get(entries))
        .route("/entries/:entry_id", get(entry))
        .route("/blocks", get(blocks))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/reset", post(reset))
        .fallback(handlers::not_found)
        .with_state(ledger);
    with_common_layers(router)
}

async fn append(
    State(ledger): State<Arc<MemoryLedger>>,
    body: Result<Json<AppendRequest>, JsonRejection>,
) -> ApiResult<Json<LedgerEntry>> {
    let Json(request) = body?;
    let entry = ledger.append(request.payload).await?;
    debug!(entry_id = %entry.id, sequence = entry.sequence, "Entry appended");
    Ok(Json(entry))
}

async fn entry(
    State(ledger): State<Arc<MemoryLedger>>,
    Path(entry_id): Path<String>,
) -> ApiResult<Json<LedgerEntry>> {
    ledger
        .get(&entry_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Ledger entry not found: {entry_id}")))
}

async fn entries(State(ledger): State<Arc<MemoryLedger>>) -> ApiResult<Json<Vec<LedgerEntry>>> {
    Ok(Json(ledger.entries().await?))
}

async fn blocks(
    State(ledger): State<Arc<MemoryLedger>>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<BlockInfo>>> {
    let Query(query) = query?;
    Ok(Json(ledger.blocks(query.limit_or(10)).await?))
}

async fn status(State(ledger): State<Arc<MemoryLedger>>) -> ApiResult<Json<ChainStatus>> {
    Ok(Json(ledger.status().await?))
}

async fn health(State(ledger): State<Arc<MemoryLedger>>) -> ApiResult<Json<Value>> {
    ledger.health().await?;
    Ok(Json(json!({ "status": "healthy", "service": "dal-ledger" })))
}

async fn reset(State(ledger): State<Arc<MemoryLedger>>) -> ApiResult<Json<Value>> {
    ledger.reset().await?;
    Ok(Json(json!({ "status": "success" })))
}
