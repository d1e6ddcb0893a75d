use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::{User, UserRole};
use crate::types::{CompanyId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    /// Random 128-bit identifier; the unit of revocation.
    pub jti: String,
    pub kind: TokenKind,
    pub company_id: Option<CompanyId>,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
}

/// Verification failures. All of these collapse to `Unauthenticated` at the
/// boundary; callers never learn which check rejected the token.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("token revoked")]
    Revoked,
    #[error("unexpected token kind")]
    WrongKind,
}

#[derive(Debug)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub access_claims: Claims,
    pub refresh_claims: Claims,
}

impl Claims {
    fn new(user: &User, kind: TokenKind, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::seconds(ttl_seconds as i64);

        Self {
            sub: user.id,
            jti: Uuid::new_v4().simple().to_string(),
            kind,
            company_id: user.company_id,
            role: user.role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        }
    }

    /// Seconds until expiry, clamped at zero.
    pub fn remaining_ttl(&self) -> u64 {
        (self.exp - Utc::now().timestamp()).max(0) as u64
    }
}

fn sign(claims: &Claims, signing_key: &str) -> anyhow::Result<String> {
    let token = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(signing_key.as_ref()),
    )?;
    Ok(token)
}

/// Issues a fresh access/refresh pair for the user.
pub fn issue_pair(
    user: &User,
    signing_key: &str,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
) -> anyhow::Result<TokenPair> {
    let access_claims = Claims::new(user, TokenKind::Access, access_ttl_seconds);
    let refresh_claims = Claims::new(user, TokenKind::Refresh, refresh_ttl_seconds);

    Ok(TokenPair {
        access: sign(&access_claims, signing_key)?,
        refresh: sign(&refresh_claims, signing_key)?,
        access_claims,
        refresh_claims,
    })
}

/// Verifies signature and expiry, then the expected kind. Revocation is the
/// caller's concern: it needs the KV and this function stays pure.
pub fn verify_token(
    token: &str,
    signing_key: &str,
    expected: TokenKind,
) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(signing_key.as_ref()),
        &validation,
    )
    .map_err(|err| match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        _ => TokenError::Malformed,
    })?;

    if data.claims.kind != expected {
        return Err(TokenError::WrongKind);
    }

    Ok(data.claims)
}
