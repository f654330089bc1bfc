pub mod auth;
pub mod health;
pub mod root;
pub mod users;

use axum::{
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    Json,
};

use crate::auth::types::ErrorBody;

/// JSON 404 for anything no route matched.
pub async fn not_found(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(
            ErrorBody::new("Not Found").with_message(format!("Cannot {method} {}", uri.path())),
        ),
    )
}
