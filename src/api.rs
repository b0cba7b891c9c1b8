//! HTTP introspection endpoints.
//!
//! Read-only projections of hub state for dashboards and health checks.

use axum::{extract::State, Json};
use serde_json::json;
use std::sync::Arc;

use crate::hub::Hub;
use crate::types::HubStats;

/// Connection and subscription counts.
///
/// GET /api/stats
pub async fn stats(State(hub): State<Arc<Hub>>) -> Json<HubStats> {
    Json(hub.stats().await)
}

/// Liveness probe with the realtime layer's stats nested in.
///
/// GET /api/health
pub async fn health(State(hub): State<Arc<Hub>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "websocket": hub.stats().await,
    }))
}
