//! Repository for message data access operations.

use crate::entities::ChatMessage;
use crate::types::{MessageError, MessageResult};
use sqlx::{Row, SqlitePool};
use tracing::info;

/// Repository for the append-only message log.
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message to the log. The rowid assigned here is the
    /// position every observer sees it at.
    pub async fn append(
        &self,
        username: &str,
        body: &str,
        sent_at: &str,
    ) -> MessageResult<ChatMessage> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO messages (username, body, sent_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(body)
        .bind(sent_at)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| MessageError::DatabaseError(e.to_string()))?;

        let message_id = result.last_insert_rowid();
        info!(message_id, username, "appended chat message");

        Ok(ChatMessage {
            id: message_id,
            username: username.to_string(),
            body: body.to_string(),
            sent_at: sent_at.to_string(),
            created_at: now,
        })
    }

    /// Fetch the full message history in persistence order.
    pub async fn list_ordered(&self) -> MessageResult<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, username, body, sent_at, created_at FROM messages ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessageError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(ChatMessage {
                    id: row
                        .try_get("id")
                        .map_err(|e| MessageError::DatabaseError(e.to_string()))?,
                    username: row
                        .try_get("username")
                        .map_err(|e| MessageError::DatabaseError(e.to_string()))?,
                    body: row
                        .try_get("body")
                        .map_err(|e| MessageError::DatabaseError(e.to_string()))?,
                    sent_at: row
                        .try_get("sent_at")
                        .map_err(|e| MessageError::DatabaseError(e.to_string()))?,
                    created_at: row
                        .try_get("created_at")
                        .map_err(|e| MessageError::DatabaseError(e.to_string()))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use crate::repos::UserRepository;

    async fn test_repositories() -> (UserRepository, MessageRepository) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        (
            UserRepository::new(pool.clone()),
            MessageRepository::new(pool),
        )
    }

    #[tokio::test]
    async fn append_preserves_insertion_order() {
        let (users, messages) = test_repositories().await;
        users.create("alice", "hash").await.unwrap();

        for body in ["one", "two", "three"] {
            messages
                .append("alice", body, "2024-01-01T00:00:00Z")
                .await
                .unwrap();
        }

        let history = messages.list_ordered().await.unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
        assert!(history.windows(2).all(|pair| pair[0].id < pair[1].id));
    }

    #[tokio::test]
    async fn empty_log_lists_nothing() {
        let (_, messages) = test_repositories().await;
        assert!(messages.list_ordered().await.unwrap().is_empty());
    }
}
