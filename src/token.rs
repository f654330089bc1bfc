//! HS256 session tokens.
//!
//! Compact form: `base64url(header).base64url(claims).base64url(signature)`, where
//! the signature is HMAC-SHA256 over the first two segments. The claims carry the
//! principal identity plus `iat`/`exp`; the lifetime is fixed by the service, so
//! callers cannot mint long-lived tokens.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{clock::Clock, store::Role};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "HS256";
pub const DEFAULT_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("signing key must be at least {MIN_SIGNING_KEY_BYTES} bytes")]
    Key,
    #[error("invalid token ttl")]
    Ttl,
    #[error("failed to encode token: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TokenError {
    /// True for failures caused by the presented token rather than by the service.
    #[must_use]
    pub const fn is_invalid_token(&self) -> bool {
        matches!(
            self,
            Self::Malformed | Self::UnsupportedAlgorithm(_) | Self::InvalidSignature | Self::Expired
        )
    }
}

/// Identity carried inside a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenPayload {
    #[serde(flatten)]
    claims: Claims,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub claims: Claims,
    pub issued_at: i64,
    pub expires_at: i64,
}

pub struct TokenService {
    key: SecretString,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("key", &"***")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// # Errors
    /// Returns `TokenError::Key` for a short key and `TokenError::Ttl` for a non-positive ttl.
    pub fn new(key: SecretString, ttl: TimeDelta, clock: Arc<dyn Clock>) -> Result<Self, TokenError> {
        if key.expose_secret().len() < MIN_SIGNING_KEY_BYTES {
            return Err(TokenError::Key);
        }
        if ttl <= TimeDelta::zero() {
            return Err(TokenError::Ttl);
        }
        Ok(Self { key, ttl, clock })
    }

    #[must_use]
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes()).map_err(|_| TokenError::Key)
    }

    /// Sign `claims` with `exp = now + ttl`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded or the key is unusable.
    pub fn sign(&self, claims: &Claims) -> Result<SignedToken, TokenError> {
        let issued_at = self.clock.now();
        let expires_at = issued_at + self.ttl;

        let header = TokenHeader {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };
        let payload = TokenPayload {
            claims: claims.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&payload)?);

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(SignedToken {
            token: format!("{signing_input}.{signature_b64}"),
            issued_at,
            expires_at,
        })
    }

    /// Verify the signature and expiry of `token` and return its claims.
    ///
    /// # Errors
    /// Returns `Malformed`, `UnsupportedAlgorithm`, `InvalidSignature` or `Expired`
    /// for a bad token, and `Key` if the service key is unusable.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let payload_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let signature_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| TokenError::Malformed)?;
        // Only the canonical encoding of a signature is accepted.
        if Base64UrlUnpadded::encode_string(&signature) != signature_b64 {
            return Err(TokenError::Malformed);
        }
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload: TokenPayload = b64d_json(payload_b64)?;
        if payload.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(VerifiedToken {
            claims: payload.claims,
            issued_at: payload.iat,
            expires_at: payload.exp,
        })
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
