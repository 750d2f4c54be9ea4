//! Shared result and error types.

pub mod errors;

pub use errors::{DatabaseError, MessageError, UserError};

pub type DatabaseResult<T> = Result<T, DatabaseError>;
pub type UserResult<T> = Result<T, UserError>;
pub type MessageResult<T> = Result<T, MessageError>;
