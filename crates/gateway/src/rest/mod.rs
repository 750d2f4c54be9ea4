//! REST API endpoints for the gateway.

pub mod auth;
pub mod health;

use axum::Router;
use std::sync::Arc;

use crate::state::GatewayState;

/// Create all REST API routes.
pub fn create_rest_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .merge(auth::create_auth_routes())
        .merge(health::create_health_routes())
}

pub use auth::{LoginRequest, RegisterRequest, SessionResponse};
