//! Error types shared by the database crate.

use thiserror::Error;

/// Errors raised while preparing or migrating the database.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("migration error: {0}")]
    MigrationError(String),
}

/// Errors raised by account persistence.
#[derive(Error, Debug)]
pub enum UserError {
    #[error("username is already taken")]
    UsernameTaken,

    #[error("user not found")]
    UserNotFound,

    #[error("database error: {0}")]
    DatabaseError(String),
}

/// Errors raised by message persistence.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("database error: {0}")]
    DatabaseError(String),
}
