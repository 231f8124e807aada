//! Short-lived HS256 bearer tokens for the Kling API.
//!
//! The service expects a standard JWT whose issuer is the access key, signed
//! with the secret key. A token is minted per lifecycle run and never reused.

use crate::config::KlingCredentials;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

/// Token lifetime in seconds.
pub const TOKEN_TTL_SECS: i64 = 1800;
/// How far `nbf` is backdated to tolerate clock skew.
pub const NOT_BEFORE_SKEW_SECS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct AuthToken {
    pub issuer: String,
    pub issued_at: i64,
    pub not_before: i64,
    pub expires_at: i64,
    encoded: String,
}

impl AuthToken {
    /// The compact JWT, suitable for an `Authorization: Bearer` header.
    pub fn bearer(&self) -> &str {
        &self.encoded
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("issuer", &self.issuer)
            .field("issued_at", &self.issued_at)
            .field("not_before", &self.not_before)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

pub fn mint_token(credentials: &KlingCredentials) -> Result<AuthToken, jsonwebtoken::errors::Error> {
    mint_token_at(credentials, chrono::Utc::now().timestamp())
}

pub fn mint_token_at(
    credentials: &KlingCredentials,
    now: i64,
) -> Result<AuthToken, jsonwebtoken::errors::Error> {
    let claims = TokenClaims {
        iss: credentials.access_key.clone(),
        iat: now,
        nbf: now - NOT_BEFORE_SKEW_SECS,
        exp: now + TOKEN_TTL_SECS,
    };

    // Header::new sets typ = "JWT" alongside the algorithm
    let encoded = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(credentials.secret_key.as_bytes()),
    )?;

    Ok(AuthToken {
        issuer: claims.iss,
        issued_at: claims.iat,
        not_before: claims.nbf,
        expires_at: claims.exp,
        encoded,
    })
}
