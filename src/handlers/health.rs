//! Liveness endpoint.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

/// Body of `GET /health`.
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "rate_limited_clients": 12,
///   "timestamp": "2026-01-15T10:30:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Clients currently tracked by the rate limiter; absent when disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limited_clients: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

pub async fn health_check<R>(state: AppState<R>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        rate_limited_clients: state.rate_limiter.as_ref().map(|l| l.client_count()),
        timestamp: Utc::now(),
    })
}
