//! Session registry: a pluggable token -> session-state store shared by
//! the request-handling path and the connection-upgrade path.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// State attached to one session token.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    /// Which account, if any, is authenticated for this session.
    pub identity: Option<String>,
    pub attributes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    fn new(attributes: HashMap<String, String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            identity: None,
            attributes,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    fn expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session store error: {0}")]
    Store(String),
}

/// Backing store for the session registry. Both implementations give
/// read-after-write consistency for a single token, which is all the
/// admission path relies on.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(
        &self,
        token: &str,
        attributes: HashMap<String, String>,
    ) -> Result<(), SessionError>;

    async fn get(&self, token: &str) -> Result<Option<SessionData>, SessionError>;

    async fn set_identity(&self, token: &str, identity: &str) -> Result<(), SessionError>;

    async fn clear_identity(&self, token: &str) -> Result<(), SessionError>;
}

/// In-process session store with lazy TTL pruning.
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<String, SessionData>>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn prune(map: &mut HashMap<String, SessionData>) {
        map.retain(|_, session| !session.expired());
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(
        &self,
        token: &str,
        attributes: HashMap<String, String>,
    ) -> Result<(), SessionError> {
        let mut guard = self.inner.write().await;
        Self::prune(&mut guard);
        guard.insert(token.to_owned(), SessionData::new(attributes, self.ttl));
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<SessionData>, SessionError> {
        {
            let guard = self.inner.read().await;
            match guard.get(token) {
                Some(session) if !session.expired() => return Ok(Some(session.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Hitting an expired entry upgrades to a write lock so dead
        // sessions do not pile up under a read-only workload.
        let mut guard = self.inner.write().await;
        Self::prune(&mut guard);
        Ok(None)
    }

    async fn set_identity(&self, token: &str, identity: &str) -> Result<(), SessionError> {
        let mut guard = self.inner.write().await;
        Self::prune(&mut guard);
        let session = guard.get_mut(token).ok_or(SessionError::NotFound)?;
        session.identity = Some(identity.to_owned());
        Ok(())
    }

    async fn clear_identity(&self, token: &str) -> Result<(), SessionError> {
        let mut guard = self.inner.write().await;
        Self::prune(&mut guard);
        let session = guard.get_mut(token).ok_or(SessionError::NotFound)?;
        session.identity = None;
        Ok(())
    }
}

/// Session store persisted in the `sessions` table. Expired rows are
/// deleted when they are next read.
pub struct SqliteSessionStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    async fn fetch_alive(&self, token: &str) -> Result<Option<SessionData>, SessionError> {
        let row = sqlx::query(
            "SELECT identity, attributes, created_at, expires_at FROM sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SessionError::Store(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: String = row
            .try_get("expires_at")
            .map_err(|e| SessionError::Store(e.to_string()))?;
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| SessionError::Store(e.to_string()))?
            .with_timezone(&Utc);

        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(token)
                .execute(&self.pool)
                .await
                .map_err(|e| SessionError::Store(e.to_string()))?;
            return Ok(None);
        }

        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| SessionError::Store(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| SessionError::Store(e.to_string()))?
            .with_timezone(&Utc);

        let attributes: String = row
            .try_get("attributes")
            .map_err(|e| SessionError::Store(e.to_string()))?;
        let attributes: HashMap<String, String> =
            serde_json::from_str(&attributes).map_err(|e| SessionError::Store(e.to_string()))?;

        Ok(Some(SessionData {
            identity: row
                .try_get("identity")
                .map_err(|e| SessionError::Store(e.to_string()))?,
            attributes,
            created_at,
            expires_at,
        }))
    }

    async fn update_identity(
        &self,
        token: &str,
        identity: Option<&str>,
    ) -> Result<(), SessionError> {
        if self.fetch_alive(token).await?.is_none() {
            return Err(SessionError::NotFound);
        }

        sqlx::query("UPDATE sessions SET identity = ? WHERE token = ?")
            .bind(identity)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn put(
        &self,
        token: &str,
        attributes: HashMap<String, String>,
    ) -> Result<(), SessionError> {
        let session = SessionData::new(attributes, self.ttl);
        let attributes = serde_json::to_string(&session.attributes)
            .map_err(|e| SessionError::Store(e.to_string()))?;

        sqlx::query(
            "INSERT OR REPLACE INTO sessions (token, identity, attributes, created_at, expires_at)
             VALUES (?, NULL, ?, ?, ?)",
        )
        .bind(token)
        .bind(attributes)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::Store(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<SessionData>, SessionError> {
        self.fetch_alive(token).await
    }

    async fn set_identity(&self, token: &str, identity: &str) -> Result<(), SessionError> {
        self.update_identity(token, Some(identity)).await
    }

    async fn clear_identity(&self, token: &str) -> Result<(), SessionError> {
        self.update_identity(token, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_database::run_migrations;

    #[tokio::test]
    async fn memory_store_read_after_write() {
        let store = MemorySessionStore::new(Duration::hours(1));
        store.put("tok", HashMap::new()).await.unwrap();

        let session = store.get("tok").await.unwrap().unwrap();
        assert!(session.identity.is_none());

        store.set_identity("tok", "alice").await.unwrap();
        let session = store.get("tok").await.unwrap().unwrap();
        assert_eq!(session.identity.as_deref(), Some("alice"));

        store.clear_identity("tok").await.unwrap();
        assert!(store.get("tok").await.unwrap().unwrap().identity.is_none());
    }

    #[tokio::test]
    async fn memory_store_entries_expire() {
        let store = MemorySessionStore::new(Duration::milliseconds(10));
        store.put("tok", HashMap::new()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;

        assert!(store.get("tok").await.unwrap().is_none());
        assert!(matches!(
            store.set_identity("tok", "alice").await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn memory_store_reads_evict_expired_entries() {
        let store = MemorySessionStore::new(Duration::milliseconds(10));
        store.put("tok-a", HashMap::new()).await.unwrap();
        store.put("tok-b", HashMap::new()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;

        // A read that lands on an expired entry prunes the whole map.
        assert!(store.get("tok-a").await.unwrap().is_none());
        assert!(store.inner.read().await.is_empty());
    }

    #[tokio::test]
    async fn memory_store_unknown_token_errors_on_identity_ops() {
        let store = MemorySessionStore::new(Duration::hours(1));
        assert!(matches!(
            store.set_identity("missing", "alice").await,
            Err(SessionError::NotFound)
        ));
        assert!(matches!(
            store.clear_identity("missing").await,
            Err(SessionError::NotFound)
        ));
    }

    async fn sqlite_store(ttl: Duration) -> SqliteSessionStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteSessionStore::new(pool, ttl)
    }

    #[tokio::test]
    async fn sqlite_store_round_trip_with_attributes() {
        let store = sqlite_store(Duration::hours(1)).await;

        let mut attributes = HashMap::new();
        attributes.insert("theme".to_string(), "dark".to_string());
        store.put("tok", attributes.clone()).await.unwrap();

        let session = store.get("tok").await.unwrap().unwrap();
        assert_eq!(session.attributes, attributes);
        assert!(session.identity.is_none());

        store.set_identity("tok", "alice").await.unwrap();
        let session = store.get("tok").await.unwrap().unwrap();
        assert_eq!(session.identity.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn sqlite_store_expired_row_is_removed_on_read() {
        let store = sqlite_store(Duration::milliseconds(10)).await;
        store.put("tok", HashMap::new()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(25)).await;

        assert!(store.get("tok").await.unwrap().is_none());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
