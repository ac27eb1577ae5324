//! Identity gate: bearer tokens and password hashing.
//!
//! Tokens are JWTs carrying `{user_id, iat, exp}`. RS256 is used when a PEM
//! key pair is configured, HS256 with a shared secret otherwise. Protected
//! handlers take an [`AuthUser`], which verifies the token once and refreshes
//! the caller's presence marker.

use std::time::Duration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use murmur_shared::UserId;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("signing key error: {0}")]
    Key(String),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly signed token and the instant it stops being accepted.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Identity established from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

pub struct IdentityGate {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl: Duration,
}

impl IdentityGate {
    pub fn from_secret(secret: &[u8], token_ttl: Duration) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            token_ttl,
        }
    }

    pub fn from_rsa_pem(
        private_pem: &[u8],
        public_pem: &[u8],
        token_ttl: Duration,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            algorithm: Algorithm::RS256,
            encoding: EncodingKey::from_rsa_pem(private_pem)
                .map_err(|e| AuthError::Key(format!("private key: {e}")))?,
            decoding: DecodingKey::from_rsa_pem(public_pem)
                .map_err(|e| AuthError::Key(format!("public key: {e}")))?,
            token_ttl,
        })
    }

    /// RS256 key files, then `JWT_SECRET`, then a random per-process secret.
    /// Configuring only one of the two key paths is an error.
    pub fn from_config(config: &ServerConfig) -> Result<Self, AuthError> {
        match (&config.jwt_private_key_path, &config.jwt_public_key_path) {
            (Some(private_path), Some(public_path)) => {
                let private_pem = std::fs::read(private_path).map_err(|e| {
                    AuthError::Key(format!("reading {}: {e}", private_path.display()))
                })?;
                let public_pem = std::fs::read(public_path).map_err(|e| {
                    AuthError::Key(format!("reading {}: {e}", public_path.display()))
                })?;
                info!(key = %private_path.display(), "Signing tokens with RS256");
                return Self::from_rsa_pem(&private_pem, &public_pem, config.token_ttl);
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AuthError::Key(
                    "JWT_PRIVATE_KEY_PATH and JWT_PUBLIC_KEY_PATH must be set together".into(),
                ));
            }
            (None, None) => {}
        }

        if let Some(secret) = &config.jwt_secret {
            info!("Signing tokens with HS256 shared secret");
            return Ok(Self::from_secret(secret.as_bytes(), config.token_ttl));
        }

        warn!("No JWT key configured; tokens will not survive a restart");
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Ok(Self::from_secret(&secret, config.token_ttl))
    }

    pub fn issue(&self, user_id: &UserId) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        let expires_at = now + ttl;

        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Rejects expired, malformed, and wrong-algorithm tokens.
    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let validation = Validation::new(self.algorithm);
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        let claims = data.claims;
        if claims.user_id.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty user_id".into()));
        }
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::InvalidToken("exp out of range".into()))?;

        Ok(AuthUser {
            user_id: UserId::from(claims.user_id),
            expires_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub async fn hash_password(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Hash(e.to_string()))
    })
    .await
    .map_err(|e| AuthError::Hash(e.to_string()))?
}

/// `Ok(false)` for a wrong password; `Err` only for an unreadable hash.
pub async fn verify_password(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|e| AuthError::Hash(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| AuthError::Hash(e.to_string()))?
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// `Authorization: Bearer <jwt>`, else `?token=<jwt>` (browsers cannot set
/// headers on a WebSocket upgrade).
fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    from_header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(q)| q.token)
    })
    .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let user = state.identity.verify(&token)?;
        state.presence.mark_online(&user.user_id).await;
        Ok(user)
    }
}
