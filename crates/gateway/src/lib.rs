//! # Murmur Gateway Crate
//!
//! HTTP and WebSocket layer for the Murmur chat backend: REST endpoints
//! for registration, login, and logout, plus the WebSocket connection
//! gateway and the message broadcast hub.

pub mod error;
pub mod rest;
pub mod state;
pub mod websocket;

pub use error::{FieldError, GatewayError, GatewayResult};
pub use state::GatewayState;
pub use websocket::{
    resolve_handshake_identity, ChatHub, ClientEvent, HistoryEntry, ServerEvent, SESSION_COOKIE,
};

use axum::{http::Method, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router with all routes.
pub fn create_router(state: GatewayState) -> Router {
    let arc_state = Arc::new(state);

    Router::new()
        .merge(rest::create_rest_routes())
        .merge(websocket::create_websocket_routes())
        .with_state(arc_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
