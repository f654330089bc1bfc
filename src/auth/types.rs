//! Request/response types for auth endpoints.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::PublicPrincipal;

/// Fields are optional so a missing field is reported as a validation detail.
#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct SignUpRequest {
    #[schema(example = "Alice")]
    pub name: Option<String>,
    #[schema(example = "alice@example.com")]
    pub email: Option<String>,
    #[schema(value_type = String, format = Password)]
    pub password: Option<SecretString>,
    #[schema(example = "user")]
    pub role: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct SignInRequest {
    #[schema(example = "alice@example.com")]
    pub email: Option<String>,
    #[schema(value_type = String, format = Password)]
    pub password: Option<SecretString>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub message: String,
    pub user: PublicPrincipal,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UsersResponse {
    pub message: String,
    pub users: Vec<PublicPrincipal>,
    pub count: usize,
}

/// Error envelope shared by every non-2xx JSON response.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
