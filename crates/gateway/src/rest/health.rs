//! Liveness endpoint.

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::state::GatewayState;

pub fn create_health_routes() -> Router<Arc<GatewayState>> {
    Router::new().route("/api/health", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
