use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::instrument;

use crate::{
    api::{error::ApiError, AppState},
    auth::types::{AuthResponse, ErrorBody, MessageResponse, SignInRequest, SignUpRequest},
};

#[utoipa::path(
    post,
    path= "/api/auth/sign-up",
    request_body = SignUpRequest,
    responses (
        (status = 201, description = "Principal registered, session cookie set", body = AuthResponse),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    tag= "auth"
)]
#[instrument(skip(state, payload))]
pub async fn sign_up(
    Extension(state): Extension<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::from_rejection(&rejection))?;
    let registered = state
        .auth
        .register(request)
        .await
        .map_err(|err| ApiError::from_auth(err, state.environment))?;

    Ok((
        StatusCode::CREATED,
        registered.headers,
        Json(AuthResponse {
            message: "User registered successfully".to_string(),
            user: registered.principal,
        }),
    ))
}

#[utoipa::path(
    post,
    path= "/api/auth/sign-in",
    request_body = SignInRequest,
    responses (
        (status = 200, description = "Signed in, session cookie set", body = AuthResponse),
        (status = 400, description = "Validation failed", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag= "auth"
)]
#[instrument(skip(state, payload))]
pub async fn sign_in(
    Extension(state): Extension<AppState>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::from_rejection(&rejection))?;
    let signed_in = state
        .auth
        .authenticate(request)
        .await
        .map_err(|err| ApiError::from_auth(err, state.environment))?;

    Ok((
        StatusCode::OK,
        signed_in.headers,
        Json(AuthResponse {
            message: "Signed in successfully".to_string(),
            user: signed_in.principal,
        }),
    ))
}

#[utoipa::path(
    post,
    path= "/api/auth/sign-out",
    responses (
        (status = 200, description = "Session cookie cleared", body = MessageResponse),
    ),
    tag= "auth"
)]
#[instrument(skip(state))]
pub async fn sign_out(Extension(state): Extension<AppState>) -> Result<impl IntoResponse, ApiError> {
    let headers = state
        .auth
        .terminate()
        .map_err(|err| ApiError::from_auth(err, state.environment))?;

    Ok((
        StatusCode::OK,
        headers,
        Json(MessageResponse {
            message: "Signed out successfully".to_string(),
        }),
    ))
}
