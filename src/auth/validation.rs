//! Input validation for the auth endpoints.
//!
//! Text is trimmed (and emails lowercased) before length checks. Every problem is
//! reported, not just the first one.

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, sync::LazyLock};
use thiserror::Error;

use super::types::{SignInRequest, SignUpRequest};
use crate::store::Role;

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 255;
pub const EMAIL_MAX_CHARS: usize = 255;
pub const PASSWORD_MIN_CHARS: usize = 6;
pub const PASSWORD_MAX_CHARS: usize = 128;

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{}", .details.join(", "))]
pub struct ValidationError {
    pub details: Vec<String>,
}

impl ValidationError {
    #[must_use]
    pub fn single(detail: impl Into<String>) -> Self {
        Self {
            details: vec![detail.into()],
        }
    }
}

pub struct SignUp {
    pub name: String,
    pub email: String,
    pub password: SecretString,
    pub role: Role,
}

impl fmt::Debug for SignUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUp")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

pub struct SignIn {
    pub email: String,
    pub password: SecretString,
}

impl fmt::Debug for SignIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignIn")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

fn check_email(raw: Option<&str>, max_chars: Option<usize>, details: &mut Vec<String>) -> String {
    let Some(raw) = raw else {
        details.push("Email is required".to_string());
        return String::new();
    };
    let email = normalize_email(raw);
    if let Some(max) = max_chars {
        if email.chars().count() > max {
            details.push(format!("Email must be at most {max} characters"));
        }
    }
    if !valid_email(&email) {
        details.push("Invalid email".to_string());
    }
    email
}

/// # Errors
/// Returns every problem found in `request`.
pub fn validate_sign_up(request: SignUpRequest) -> Result<SignUp, ValidationError> {
    let mut details = Vec::new();

    let name = request.name.as_deref().map(str::trim).unwrap_or_default().to_string();
    if request.name.is_none() {
        details.push("Name is required".to_string());
    } else if name.chars().count() < NAME_MIN_CHARS {
        details.push(format!("Name must be at least {NAME_MIN_CHARS} characters"));
    } else if name.chars().count() > NAME_MAX_CHARS {
        details.push(format!("Name must be at most {NAME_MAX_CHARS} characters"));
    }

    let email = check_email(request.email.as_deref(), Some(EMAIL_MAX_CHARS), &mut details);

    match &request.password {
        None => details.push("Password is required".to_string()),
        Some(password) => {
            let length = password.expose_secret().chars().count();
            if length < PASSWORD_MIN_CHARS {
                details.push(format!(
                    "Password must be at least {PASSWORD_MIN_CHARS} characters"
                ));
            } else if length > PASSWORD_MAX_CHARS {
                details.push(format!(
                    "Password must be at most {PASSWORD_MAX_CHARS} characters"
                ));
            }
        }
    }

    let role = match request.role.as_deref() {
        None => Some(Role::User),
        Some(role) => {
            let parsed = role.parse::<Role>().ok();
            if parsed.is_none() {
                details.push("Role must be one of: user, admin".to_string());
            }
            parsed
        }
    };

    match (request.password, role) {
        (Some(password), Some(role)) if details.is_empty() => Ok(SignUp {
            name,
            email,
            password,
            role,
        }),
        _ => Err(ValidationError { details }),
    }
}

/// # Errors
/// Returns every problem found in `request`.
pub fn validate_sign_in(request: SignInRequest) -> Result<SignIn, ValidationError> {
    let mut details = Vec::new();

    let email = check_email(request.email.as_deref(), None, &mut details);

    let password = request
        .password
        .filter(|password| !password.expose_secret().is_empty());
    if password.is_none() {
        details.push("Password is required".to_string());
    }

    match password {
        Some(password) if details.is_empty() => Ok(SignIn { email, password }),
        _ => Err(ValidationError { details }),
    }
}
