//! Bearer-token session handling. Tokens are HS256 JWTs carrying identity
//! only; group membership and the teacher profile are re-checked against the
//! database on every request, so a revoked membership takes effect
//! immediately.

use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id the token was issued to.
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    expiry_seconds: i64,
}

impl TokenIssuer {
    /// Secret length is enforced by config validation before construction.
    pub fn new(secret: impl Into<String>, expiry_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            expiry_seconds,
        }
    }

    pub fn expiry_seconds(&self) -> i64 {
        self.expiry_seconds
    }

    pub fn generate(
        &self,
        account_id: &str,
        username: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: account_id.to_string(),
            username: username.to_string(),
            iat: now,
            exp: now + self.expiry_seconds,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header. Other
/// schemes and bare tokens are rejected.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
