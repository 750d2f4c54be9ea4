//! Credential authentication and session issuance for the Murmur backend.
//!
//! The [`Authenticator`] bridges the two connection models the server
//! supports: short-lived HTTP requests establish an identity marker on a
//! session, and the long-lived WebSocket path resolves it exactly once at
//! admission time via [`Authenticator::resolve_identity`].

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use murmur_database::{User, UserError, UserRepository};
use rand::RngCore;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub mod session;

pub use session::{
    MemorySessionStore, SessionData, SessionError, SessionStore, SqliteSessionStore,
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username is already taken")]
    UsernameTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("session not found")]
    SessionNotFound,
    #[error("no authenticated identity on session")]
    Unauthenticated,
    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] argon2::password_hash::Error),
    #[error("session store error: {0}")]
    SessionStore(String),
    #[error("database error: {0}")]
    Database(String),
}

impl From<SessionError> for AuthError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::NotFound => AuthError::SessionNotFound,
            SessionError::Store(message) => AuthError::SessionStore(message),
        }
    }
}

impl From<UserError> for AuthError {
    fn from(value: UserError) -> Self {
        match value {
            UserError::UsernameTaken => AuthError::UsernameTaken,
            other => AuthError::Database(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct Authenticator {
    users: UserRepository,
    sessions: Arc<dyn SessionStore>,
}

impl Authenticator {
    pub fn new(pool: SqlitePool, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            users: UserRepository::new(pool),
            sessions,
        }
    }

    /// Open a fresh unauthenticated session and return its token.
    pub async fn open_session(&self) -> Result<String, AuthError> {
        let token = generate_session_token();
        self.sessions.put(&token, HashMap::new()).await?;
        Ok(token)
    }

    /// Register a new account. A duplicate username surfaces as
    /// [`AuthError::UsernameTaken`] even when registrations overlap.
    pub async fn register(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let password_hash = hash_password(password)?;
        let user = self.users.create(username, &password_hash).await?;
        info!(username, "registered new account");
        Ok(user)
    }

    /// Verify credentials and mark the session named by `token` as
    /// authenticated for that account.
    ///
    /// Unknown-username and wrong-password failures are distinguished in
    /// the log for audit purposes only; callers always see the single
    /// generic [`AuthError::InvalidCredentials`], so the response surface
    /// cannot be used to enumerate accounts.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        token: &str,
    ) -> Result<String, AuthError> {
        let user = match self.users.find_by_username(username).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(username, "login rejected: unknown username");
                return Err(AuthError::InvalidCredentials);
            }
            Err(error) => return Err(AuthError::Database(error.to_string())),
        };

        let stored_hash = PasswordHash::new(&user.password_hash)?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &stored_hash)
            .is_err()
        {
            warn!(username, "login rejected: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        self.sessions.set_identity(token, username).await?;

        info!(username, "login succeeded");
        Ok(user.username)
    }

    /// Clear the identity marker on an authenticated session.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let session = self
            .sessions
            .get(token)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        let Some(identity) = session.identity else {
            return Err(AuthError::Unauthenticated);
        };

        self.sessions.clear_identity(token).await?;
        info!(username = %identity, "logged out");
        Ok(())
    }

    /// One-shot resolution of a session token to its authenticated
    /// identity, used by the connection gateway at admission time. The
    /// result is never cached here; an admitted connection keeps the
    /// identity it was tagged with even if this session later vanishes.
    pub async fn resolve_identity(&self, token: &str) -> Result<Option<String>, AuthError> {
        Ok(self
            .sessions
            .get(token)
            .await?
            .and_then(|session| session.identity))
    }

    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.sessions.clone()
    }
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
