use axum::{response::IntoResponse, Json};
use tracing::debug;

use crate::auth::types::MessageResponse;

pub async fn root() -> impl IntoResponse {
    debug!("Received request to /");
    concat!("Hello, from ", env!("CARGO_PKG_NAME"), "!")
}

#[utoipa::path(
    get,
    path= "/api",
    responses (
        (status = 200, description = "API is running", body = MessageResponse),
    ),
    tag= "gatehouse"
)]
pub async fn api() -> impl IntoResponse {
    Json(MessageResponse {
        message: "Gatehouse API is running!".to_string(),
    })
}
