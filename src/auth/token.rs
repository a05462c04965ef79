//! Signed, opaque session tokens handed back to clients on successful
//! authentication (spec.md §4.3's `sessionToken`).
//!
//! The token is a JWT so verification needs no round-trip to the database;
//! the database session row remains the source of truth for revocation
//! (`cleanup_stale_sessions`, `end_session`) and activity tracking.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the authenticated user's id.
    pub sub: Uuid,
    pub username: String,
    pub platform: String,
    pub session_id: Uuid,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug)]
pub enum TokenError {
    Encode(String),
    Decode(String),
    Expired,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Encode(msg) => write!(f, "failed to sign session token: {msg}"),
            TokenError::Decode(msg) => write!(f, "failed to verify session token: {msg}"),
            TokenError::Expired => write!(f, "session token expired"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Mints and verifies HMAC-signed session tokens.
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenManager {
    pub fn new(secret: &[u8], ttl_seconds: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        username: &str,
        platform: &str,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            platform: platform.to_string(),
            session_id,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default()).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Decode(e.to_string()),
            },
        )?;
        Ok(data.claims)
    }
}
