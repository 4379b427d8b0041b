//! services/chat/src/adapters/auth.rs
//!
//! This module contains the auth provider adapter. Credentials live in a
//! Postgres table with argon2 password hashing; sign-in/sign-out
//! transitions are fanned out to subscribers as `AuthEvent`s.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use async_trait::async_trait;
use carechat_core::ports::{AuthEvent, AuthProvider, PortError, PortResult};
use sqlx::PgPool;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An auth adapter that implements the `AuthProvider` port over a Postgres
/// credentials table.
pub struct PgAuthAdapter {
    pool: PgPool,
    subscribers: Mutex<Vec<mpsc::Sender<AuthEvent>>>,
}

impl PgAuthAdapter {
    /// Creates a new `PgAuthAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, event: AuthEvent) {
        let mut subscribers = self.subscribers.lock().expect("auth subscribers poisoned");
        subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    fn hash_password(password: &str) -> PortResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

//=========================================================================================
// `AuthProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthProvider for PgAuthAdapter {
    async fn create_user(&self, email: &str, password: &str) -> PortResult<String> {
        let uid = Uuid::new_v4().to_string();
        let hashed = Self::hash_password(password)?;

        let inserted = sqlx::query(
            "INSERT INTO credentials (uid, email, hashed_password) VALUES ($1, $2, $3)
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(&uid)
        .bind(email)
        .bind(&hashed)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        if inserted.rows_affected() == 0 {
            return Err(PortError::Unexpected(format!(
                "an account already exists for {email}"
            )));
        }

        info!(uid, "auth identity created");
        Ok(uid)
    }

    async fn delete_user(&self, uid: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM credentials WHERE uid = $1")
            .bind(uid)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        warn!(uid, "auth identity deleted");
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<String> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT uid, hashed_password FROM credentials WHERE email = $1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let (uid, hashed) = row.ok_or(PortError::Unauthorized)?;

        let parsed =
            PasswordHash::new(&hashed).map_err(|e| PortError::Unexpected(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| PortError::Unauthorized)?;

        info!(uid, "user signed in");
        self.emit(AuthEvent::SignedIn(uid.clone()));
        Ok(uid)
    }

    async fn sign_out(&self) -> PortResult<()> {
        info!("user signed out");
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<AuthEvent> {
        let (tx, rx) = mpsc::channel(8);
        self.subscribers
            .lock()
            .expect("auth subscribers poisoned")
            .push(tx);
        rx
    }
}
