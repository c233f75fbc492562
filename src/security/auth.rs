//! SMTP AUTH: mechanisms, wire decoding, and the abstract user store (C6).
//!
//! # Supported mechanisms
//! - PLAIN (RFC 4616)
//! - LOGIN (common but not standardized)
//!
//! CRAM-MD5/DIGEST-MD5 are intentionally absent: they require the server to
//! hold a reversible or challenge-derivable form of the password, which is
//! incompatible with Argon2id-hashed storage.

use crate::error::{Result, SmtpError};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sqlx::SqlitePool;
use tracing::warn;

/// SMTP authentication mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Plain,
    Login,
}

impl AuthMechanism {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// Result of checking credentials against the user store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    BadCredentials,
    Unavailable,
}

/// Abstract credential store (C6). Implementations are external to the
/// core: a real deployment backs this with a database and Argon2id, a test
/// backs it with an in-memory map.
///
/// Implementations must be safe to call concurrently and are expected to
/// take roughly constant time whether or not `username` exists, so failed
/// logins don't leak which addresses are registered via timing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> VerifyOutcome;
}

/// Decode `AUTH PLAIN` payload: `\0username\0password`, base64-encoded.
pub fn decode_plain_auth(auth_data: &str) -> Result<(String, String)> {
    let decoded = BASE64
        .decode(auth_data.trim())
        .map_err(|e| SmtpError::Malformed(format!("invalid base64: {e}")))?;

    let parts: Vec<&str> = std::str::from_utf8(&decoded)
        .map_err(|e| SmtpError::Malformed(format!("invalid utf-8: {e}")))?
        .split('\0')
        .collect();

    if parts.len() != 3 {
        return Err(SmtpError::Malformed("invalid PLAIN auth format".to_string()));
    }

    // parts[0] is the authorization identity (commonly empty); parts[1] is
    // the authentication identity (username); parts[2] is the password.
    Ok((parts[1].to_string(), parts[2].to_string()))
}

/// Decode one `AUTH LOGIN` prompt response (username or password line).
pub fn decode_login_credential(credential: &str) -> Result<String> {
    let decoded = BASE64
        .decode(credential.trim())
        .map_err(|e| SmtpError::Malformed(format!("invalid base64: {e}")))?;

    String::from_utf8(decoded).map_err(|e| SmtpError::Malformed(format!("invalid utf-8: {e}")))
}

/// SQLite-backed [`UserStore`] using Argon2id for verification.
///
/// Expects a `users` table with `username TEXT PRIMARY KEY` and
/// `password_hash TEXT` (a PHC-format Argon2id hash). Constant-time
/// behavior on unknown usernames is approximated by still running a hash
/// verification against a fixed dummy hash, rather than returning early.
pub struct SqliteUserStore {
    pool: SqlitePool,
    dummy_hash: String,
}

impl SqliteUserStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| SmtpError::Config(format!("failed to connect to user database: {e}")))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| SmtpError::Config(format!("failed to initialize user table: {e}")))?;

        let dummy_hash = hash_password("not-a-real-password")?;
        Ok(Self { pool, dummy_hash })
    }

    pub async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        let hash = hash_password(password)?;
        sqlx::query(
            "INSERT OR REPLACE INTO users (username, password_hash, created_at) \
             VALUES (?, ?, COALESCE((SELECT created_at FROM users WHERE username = ?), datetime('now')))",
        )
        .bind(username)
        .bind(hash)
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(|e| SmtpError::Config(format!("failed to store user: {e}")))?;
        Ok(())
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SmtpError::Config(format!("failed to query user: {e}")))?;
        Ok(count.0 > 0)
    }

    pub async fn delete_user(&self, username: &str) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| SmtpError::Config(format!("failed to delete user: {e}")))?;
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT username, created_at FROM users ORDER BY username")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SmtpError::Config(format!("failed to list users: {e}")))?;
        Ok(rows)
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| SmtpError::Internal(format!("failed to hash password: {e}")))
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn verify(&self, username: &str, password: &str) -> VerifyOutcome {
        let row: Option<(String,)> =
            match sqlx::query_as("SELECT password_hash FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
            {
                Ok(row) => row,
                Err(e) => {
                    warn!(error = %e, "user store query failed");
                    return VerifyOutcome::Unavailable;
                }
            };

        let (stored_hash, found) = match &row {
            Some((hash,)) => (hash.as_str(), true),
            None => (self.dummy_hash.as_str(), false),
        };

        let parsed = match PasswordHash::new(stored_hash) {
            Ok(h) => h,
            Err(_) => return VerifyOutcome::Unavailable,
        };
        let matches = Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();

        if found && matches {
            VerifyOutcome::Verified
        } else {
            VerifyOutcome::BadCredentials
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory user store for tests: plaintext comparison, no hashing.
    pub struct InMemoryUserStore {
        users: Mutex<HashMap<String, String>>,
        unavailable: bool,
    }

    impl InMemoryUserStore {
        pub fn new() -> Self {
            Self {
                users: Mutex::new(HashMap::new()),
                unavailable: false,
            }
        }

        pub fn unavailable() -> Self {
            Self {
                users: Mutex::new(HashMap::new()),
                unavailable: true,
            }
        }

        pub fn with_user(self, username: &str, password: &str) -> Self {
            self.users
                .lock()
                .unwrap()
                .insert(username.to_string(), password.to_string());
            self
        }
    }

    #[async_trait]
    impl UserStore for InMemoryUserStore {
        async fn verify(&self, username: &str, password: &str) -> VerifyOutcome {
            if self.unavailable {
                return VerifyOutcome::Unavailable;
            }
            match self.users.lock().unwrap().get(username) {
                Some(p) if p == password => VerifyOutcome::Verified,
                _ => VerifyOutcome::BadCredentials,
            }
        }
    }
}
