//! WebSocket endpoints for the gateway.

pub mod chat;
pub mod hub;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::state::GatewayState;

/// Create all WebSocket routes.
pub fn create_websocket_routes() -> Router<Arc<GatewayState>> {
    Router::new().route("/api/chat/ws", get(chat::chat_websocket_handler))
}

pub use chat::{chat_websocket_handler, resolve_handshake_identity, SESSION_COOKIE};
pub use hub::{ChatHub, ClientEvent, HistoryEntry, ServerEvent};
