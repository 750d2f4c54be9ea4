//! Repository for account data access operations.

use crate::entities::User;
use crate::types::{UserError, UserResult};
use sqlx::{Row, SqlitePool};
use tracing::info;

/// Repository for account database operations.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new account. Uniqueness is enforced by the `UNIQUE`
    /// constraint on `username`, so overlapping registrations of the
    /// same name resolve atomically: one insert wins, the other maps to
    /// [`UserError::UsernameTaken`].
    pub async fn create(&self, username: &str, password_hash: &str) -> UserResult<User> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => UserError::UsernameTaken,
            _ => UserError::DatabaseError(e.to_string()),
        })?;

        let user_id = result.last_insert_rowid();
        info!(user_id, username, "created new account");

        Ok(User {
            id: user_id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
        })
    }

    /// Find an account by username.
    pub async fn find_by_username(&self, username: &str) -> UserResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| UserError::DatabaseError(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(Self::map_user(&row)?)),
            None => Ok(None),
        }
    }

    /// List every account, oldest first.
    pub async fn find_all(&self) -> UserResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, username, password_hash, created_at FROM users ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| UserError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::map_user).collect()
    }

    fn map_user(row: &sqlx::sqlite::SqliteRow) -> UserResult<User> {
        Ok(User {
            id: row
                .try_get("id")
                .map_err(|e| UserError::DatabaseError(e.to_string()))?,
            username: row
                .try_get("username")
                .map_err(|e| UserError::DatabaseError(e.to_string()))?,
            password_hash: row
                .try_get("password_hash")
                .map_err(|e| UserError::DatabaseError(e.to_string()))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| UserError::DatabaseError(e.to_string()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;

    async fn test_repository() -> UserRepository {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        UserRepository::new(pool)
    }

    #[tokio::test]
    async fn create_and_find_account() {
        let repo = test_repository().await;

        let created = repo.create("alice", "hash").await.unwrap();
        assert_eq!(created.username, "alice");

        let found = repo.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.password_hash, "hash");
    }

    #[tokio::test]
    async fn find_missing_account_returns_none() {
        let repo = test_repository().await;
        assert!(repo.find_by_username("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let repo = test_repository().await;

        repo.create("alice", "hash-one").await.unwrap();
        let result = repo.create("alice", "hash-two").await;
        assert!(matches!(result, Err(UserError::UsernameTaken)));

        // The first record is untouched.
        let found = repo.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.password_hash, "hash-one");
        assert_eq!(repo.find_all().await.unwrap().len(), 1);
    }

    async fn concurrent_test_repository() -> (UserRepository, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = murmur_config::DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("users.db").display()),
            max_connections: 5,
        };
        let pool = crate::connection::prepare_database(&config).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (UserRepository::new(pool), dir)
    }

    #[tokio::test]
    async fn overlapping_duplicate_registrations_yield_one_winner() {
        let (repo, _dir) = concurrent_test_repository().await;

        for round in 0..20 {
            let username = format!("user{round}");
            let (a, b) = tokio::join!(
                repo.create(&username, "hash-a"),
                repo.create(&username, "hash-b")
            );

            let outcomes = [a, b];
            assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(outcomes
                .iter()
                .any(|r| matches!(r, Err(UserError::UsernameTaken))));
        }
    }

    #[tokio::test]
    async fn overlapping_distinct_registrations_both_succeed() {
        let (repo, _dir) = concurrent_test_repository().await;

        for round in 0..20 {
            let alice = format!("alice{round}");
            let bob = format!("bob{round}");
            let (a, b) = tokio::join!(
                repo.create(&alice, "hash"),
                repo.create(&bob, "hash")
            );
            a.unwrap();
            b.unwrap();
        }
    }
}
