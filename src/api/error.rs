//! JSON error responses.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::error::Error as StdError;
use tracing::error;

use crate::auth::{types::ErrorBody, AuthError, Environment};

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, body: ErrorBody) -> Self {
        Self { status, body }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn body(&self) -> &ErrorBody {
        &self.body
    }

    /// Opaque 500. The full chain is logged; clients only see it in development.
    pub fn internal(err: &(dyn StdError + 'static), environment: Environment) -> Self {
        let chain = error_chain(err);
        error!("Request failed: {chain}");
        let mut body = ErrorBody::new("Internal Server Error");
        if environment.is_development() {
            body = body.with_details(chain);
        }
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, body)
    }

    /// A request body that could not be parsed is a validation failure.
    #[must_use]
    pub fn from_rejection(rejection: &JsonRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorBody::new("Validation failed").with_details(rejection.body_text()),
        )
    }

    pub fn from_auth(err: AuthError, environment: Environment) -> Self {
        match err {
            AuthError::Validation(validation) => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorBody::new("Validation failed").with_details(validation.to_string()),
            ),
            AuthError::DuplicateIdentity => {
                Self::new(StatusCode::CONFLICT, ErrorBody::new("Email already exist"))
            }
            AuthError::InvalidCredentials => {
                Self::new(StatusCode::UNAUTHORIZED, ErrorBody::new("Invalid credentials"))
            }
            other => Self::internal(&other, environment),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::ValidationError, hasher::HashingError};

    #[test]
    fn caller_errors_map_to_specific_statuses() {
        let validation = ApiError::from_auth(
            AuthError::Validation(ValidationError {
                details: vec!["Invalid email".to_string(), "Password is required".to_string()],
            }),
            Environment::Production,
        );
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.body().error, "Validation failed");
        assert_eq!(
            validation.body().details.as_deref(),
            Some("Invalid email, Password is required")
        );

        let duplicate = ApiError::from_auth(AuthError::DuplicateIdentity, Environment::Production);
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
        assert_eq!(duplicate.body(), &ErrorBody::new("Email already exist"));

        let invalid = ApiError::from_auth(AuthError::InvalidCredentials, Environment::Production);
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.body(), &ErrorBody::new("Invalid credentials"));
    }

    #[test]
    fn internal_detail_only_in_development() {
        let production = ApiError::from_auth(
            AuthError::Hashing(HashingError::MalformedHash),
            Environment::Production,
        );
        assert_eq!(production.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(production.body(), &ErrorBody::new("Internal Server Error"));

        let development = ApiError::from_auth(
            AuthError::Hashing(HashingError::MalformedHash),
            Environment::Development,
        );
        assert_eq!(
            development.body().details.as_deref(),
            Some("malformed password hash")
        );
    }
}
