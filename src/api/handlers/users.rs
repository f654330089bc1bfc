use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{info, instrument};

use crate::{
    api::{error::ApiError, AppState},
    auth::types::{ErrorBody, MessageResponse, UsersResponse},
    store::PublicPrincipal,
};

#[utoipa::path(
    get,
    path= "/api/users",
    responses (
        (status = 200, description = "All principals, newest first", body = UsersResponse),
        (status = 500, description = "Store failure", body = ErrorBody),
    ),
    tag= "users"
)]
#[instrument(skip(state))]
pub async fn list(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    info!("Getting users...");
    let principals = state
        .auth
        .store()
        .list()
        .await
        .map_err(|err| ApiError::internal(&err, state.environment))?;
    let users: Vec<PublicPrincipal> = principals.iter().map(PublicPrincipal::from).collect();

    Ok(Json(UsersResponse {
        message: "Successfully retrieved users".to_string(),
        count: users.len(),
        users,
    }))
}

fn not_implemented(route: &str) -> (StatusCode, Json<MessageResponse>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(MessageResponse {
            message: format!("{route} - Not implemented yet"),
        }),
    )
}

pub async fn create() -> impl IntoResponse {
    not_implemented("POST /users")
}

pub async fn get_by_id(Path(_id): Path<String>) -> impl IntoResponse {
    not_implemented("GET /users/:id")
}

pub async fn update(Path(_id): Path<String>) -> impl IntoResponse {
    not_implemented("PUT /users/:id")
}

pub async fn delete(Path(_id): Path<String>) -> impl IntoResponse {
    not_implemented("DELETE /users/:id")
}
