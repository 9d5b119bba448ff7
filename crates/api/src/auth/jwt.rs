//! JWT access/refresh token pairs.
//!
//! Every token carries a JTI that maps to a `user_sessions` row, so a
//! token can be revoked before its expiry. The middleware checks both the
//! signature and the session row on every request.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use leadforge_shared::Role;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub role: Role,
    /// Token id, tracked in `user_sessions` for revocation.
    pub jti: String,
    /// "access" or "refresh".
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly issued access/refresh pair with the metadata the session
/// store needs.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub access_jti: String,
    pub access_expires_at: OffsetDateTime,
    pub refresh_token: String,
    pub refresh_jti: String,
    pub refresh_expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_expiry: Duration,
    refresh_expiry: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, access_expiry_hours: i64, refresh_expiry_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_expiry: Duration::hours(access_expiry_hours),
            refresh_expiry: Duration::days(refresh_expiry_days),
        }
    }

    pub fn generate_pair(&self, user_id: Uuid, role: Role) -> ApiResult<TokenPair> {
        let now = OffsetDateTime::now_utc();
        let access_jti = Uuid::new_v4().to_string();
        let refresh_jti = Uuid::new_v4().to_string();
        let access_expires_at = now + self.access_expiry;
        let refresh_expires_at = now + self.refresh_expiry;

        let access_token = self.sign(Claims {
            sub: user_id,
            role,
            jti: access_jti.clone(),
            token_type: TokenType::Access.as_str().to_string(),
            iat: now.unix_timestamp(),
            exp: access_expires_at.unix_timestamp(),
        })?;

        let refresh_token = self.sign(Claims {
            sub: user_id,
            role,
            jti: refresh_jti.clone(),
            token_type: TokenType::Refresh.as_str().to_string(),
            iat: now.unix_timestamp(),
            exp: refresh_expires_at.unix_timestamp(),
        })?;

        Ok(TokenPair {
            access_token,
            access_jti,
            access_expires_at,
            refresh_token,
            refresh_jti,
            refresh_expires_at,
        })
    }

    /// Verify signature, expiry, and token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> ApiResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| ApiError::Unauthorized)?;

        if data.claims.token_type != expected.as_str() {
            return Err(ApiError::Unauthorized);
        }

        Ok(data.claims)
    }

    fn sign(&self, claims: Claims) -> ApiResult<String> {
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
    }
}
