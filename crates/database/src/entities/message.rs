//! Message entity definitions.

use serde::{Deserialize, Serialize};

/// A persisted chat message. Append-only; `id` defines the total order
/// every connected client observes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub username: String,
    pub body: String,
    /// Client-supplied timestamp, RFC 3339.
    pub sent_at: String,
    pub created_at: String,
}
