//! Entity definitions for the database crate.

pub mod message;
pub mod user;

pub use message::ChatMessage;
pub use user::User;
