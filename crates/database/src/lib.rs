//! Murmur Database Crate
//!
//! Connection management, migrations, and repository implementations for
//! the account and message stores.

use murmur_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::prepare_database;
pub use migrations::run_migrations;

pub use repos::{MessageRepository, UserRepository};

pub use entities::{ChatMessage, User};

pub use types::{
    errors::{DatabaseError, MessageError, UserError},
    DatabaseResult, MessageResult, UserResult,
};

/// Initialize the database with migrations.
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

    Ok(pool)
}
