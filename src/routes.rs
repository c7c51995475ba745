//! HTTP routes for the screener service.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::screener::{InstrumentCheck, ScreenResult};
use crate::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success_days: usize,
    pub failed_days: usize,
    pub watermark: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub results: Vec<ScreenResult>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub watermark: Option<String>,
    pub bar_rows: u64,
    pub flow_rows: u64,
    pub instrument_rows: u64,
    pub notifications_enabled: bool,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "breakout-screener".to_string(),
    })
}

/// Trigger an incremental data sync
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncResponse>, StatusCode> {
    let outcome = state.pipeline.run_sync().await.map_err(|e| {
        error!(error = %e, "Sync request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(SyncResponse {
        success_days: outcome.success_days,
        failed_days: outcome.failed_days,
        watermark: outcome.watermark.map(|d| d.to_string()),
        message: outcome.message,
    }))
}

/// Trigger a screening scan over the current store contents
pub async fn trigger_scan(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScanResponse>, StatusCode> {
    let results = state.pipeline.run_scan().await.map_err(|e| {
        error!(error = %e, "Scan request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let count = results.len();
    Ok(Json(ScanResponse { results, count }))
}

/// Drop all stored market data so the next sync rebuilds from scratch
pub async fn trigger_reset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, StatusCode> {
    state.pipeline.run_reset().await.map_err(|e| {
        error!(error = %e, "Reset request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ResetResponse {
        message: "Store cleared, next sync rebuilds the full lookback window".to_string(),
    }))
}

/// Diagnose a single instrument against the funnel stages
pub async fn check_instrument(
    State(state): State<Arc<AppState>>,
    Path(ts_code): Path<String>,
) -> Result<Json<InstrumentCheck>, StatusCode> {
    let check = state.pipeline.run_check(&ts_code).await.map_err(|e| {
        error!(error = %e, code = %ts_code, "Check request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(check))
}

/// Get store and service status
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let stats = state.store.stats().await.map_err(|e| {
        error!(error = %e, "Status query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(StatusResponse {
        watermark: stats.latest_bar_date.map(|d| d.to_string()),
        bar_rows: stats.bar_rows,
        flow_rows: stats.flow_rows,
        instrument_rows: stats.instrument_rows,
        notifications_enabled: state.notifier.is_enabled(),
    }))
}
