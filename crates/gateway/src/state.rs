//! Shared application state for the gateway.

use crate::websocket::hub::ChatHub;
use murmur_auth::Authenticator;
use murmur_database::MessageRepository;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared state: the authenticator (session registry included) and the
/// broadcast hub that owns every admitted connection.
#[derive(Clone)]
pub struct GatewayState {
    pub pool: SqlitePool,
    pub authenticator: Authenticator,
    pub hub: Arc<ChatHub>,
}

impl GatewayState {
    pub fn new(pool: SqlitePool, authenticator: Authenticator) -> Self {
        let hub = Arc::new(ChatHub::new(MessageRepository::new(pool.clone())));
        Self {
            pool,
            authenticator,
            hub,
        }
    }
}
