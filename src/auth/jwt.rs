//! Token minting/verification and password hashing.

use std::collections::BTreeSet;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{Permission, User};
use crate::error::{AppError, AppResult};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: String,
    pub username: String,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth("Invalid user ID in token".into()))
    }
}

// ============================================================================
// Token signer
// ============================================================================

/// Process-wide signing configuration, built once at startup.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    expiration_minutes: i64,
}

impl TokenSigner {
    pub fn new(secret: &str, algorithm: &str, expiration_minutes: i64) -> Self {
        let algorithm = algorithm.parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown JWT algorithm '{algorithm}', falling back to HS256");
            Algorithm::HS256
        });
        TokenSigner {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            expiration_minutes,
        }
    }

    pub fn expires_in_seconds(&self) -> i64 {
        self.expiration_minutes * 60
    }

    pub fn mint(&self, user: &User) -> AppResult<String> {
        self.mint_with_expiration(user, self.expiration_minutes)
    }

    fn mint_with_expiration(&self, user: &User, minutes: i64) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.user_id.to_string(),
            username: user.username.clone(),
            permissions: user.permissions.clone(),
            exp: (now + Duration::minutes(minutes)).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding).map_err(|e| {
            tracing::error!("Failed to create access token: {e}");
            AppError::Internal
        })
    }

    /// Rejects tampered, expired, or malformed tokens.
    pub fn decode(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::new(self.algorithm))
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Token validation failed: {e}");
                AppError::Auth("Invalid or expired token".into())
            })
    }
}

// ============================================================================
// Password hashing
// ============================================================================

/// Hash a password with argon2 and a per-password salt.
///
/// Deliberately slow, so it runs on the blocking pool rather than a Tokio
/// worker thread.
pub async fn hash_password(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| {
        tracing::error!("Password hashing task failed: {e}");
        AppError::Internal
    })?
    .map_err(|e| {
        tracing::error!("Failed to hash password: {e}");
        AppError::Internal
    })
}

/// Verify a candidate password against a stored hash. Constant-time with
/// respect to the candidate.
pub async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!("Stored password hash is malformed: {e}");
            false
        }
    })
    .await
    .map_err(|e| {
        tracing::error!("Password verification task failed: {e}");
        AppError::Internal
    })
}

// ============================================================================
// Tests
// ============================================================================
