//! Session cookie contract.
//!
//! The token travels in a host-only `token` cookie. Setting and clearing use the same
//! attribute set so browsers treat the clearing cookie as the same cookie.

use axum::http::{
    header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use thiserror::Error;

pub const SESSION_COOKIE_NAME: &str = "token";

const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

#[derive(Debug, Error)]
#[error("session cookie is not a valid header value")]
pub struct SessionError(#[from] axum::http::header::InvalidHeaderValue);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionTransport {
    max_age_seconds: i64,
    secure: bool,
}

impl SessionTransport {
    #[must_use]
    pub const fn new(max_age_seconds: i64, secure: bool) -> Self {
        Self {
            max_age_seconds,
            secure,
        }
    }

    #[must_use]
    pub const fn secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub const fn max_age_seconds(&self) -> i64 {
        self.max_age_seconds
    }

    fn attributes(&self) -> String {
        let mut attributes = String::from("Path=/; HttpOnly; SameSite=Strict");
        if self.secure {
            attributes.push_str("; Secure");
        }
        attributes
    }

    /// Append a `Set-Cookie` carrying `token` to `headers`.
    ///
    /// # Errors
    /// Returns `SessionError` if the token contains bytes not allowed in a header.
    pub fn attach(&self, headers: &mut HeaderMap, token: &str) -> Result<(), SessionError> {
        let cookie = format!(
            "{SESSION_COOKIE_NAME}={token}; {}; Max-Age={}",
            self.attributes(),
            self.max_age_seconds
        );
        headers.append(SET_COOKIE, HeaderValue::from_str(&cookie)?);
        Ok(())
    }

    /// Append a `Set-Cookie` that expires the session cookie immediately.
    ///
    /// # Errors
    /// Returns `SessionError` if the header value cannot be built.
    pub fn clear(&self, headers: &mut HeaderMap) -> Result<(), SessionError> {
        let cookie = format!(
            "{SESSION_COOKIE_NAME}=; {}; Max-Age=0; Expires={EPOCH_EXPIRES}",
            self.attributes()
        );
        headers.append(SET_COOKIE, HeaderValue::from_str(&cookie)?);
        Ok(())
    }

    /// Token presented by the client: the session cookie first, then a Bearer header.
    #[must_use]
    pub fn read(headers: &HeaderMap) -> Option<String> {
        extract_cookie_token(headers).or_else(|| extract_bearer_token(headers))
    }
}

fn extract_cookie_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().map(str::trim);
            let val = parts.next().map(str::trim);
            if let (Some(SESSION_COOKIE_NAME), Some(val)) = (key, val) {
                if !val.is_empty() {
                    return Some(val.to_string());
                }
            }
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
