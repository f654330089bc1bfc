#![allow(clippy::needless_for_each)]

use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

#[allow(unused_imports)]
use super::handlers::{
    auth::{__path_sign_in, __path_sign_out, __path_sign_up},
    health::{self, __path_health},
    root::__path_api,
    users::__path_list,
};
use crate::{
    auth::types::{
        AuthResponse, ErrorBody, MessageResponse, SignInRequest, SignUpRequest, UsersResponse,
    },
    store::{PublicPrincipal, Role},
};

#[derive(OpenApi)]
#[openapi(
    paths(api, health, sign_up, sign_in, sign_out, list),
    components(
        schemas(
            health::Health,
            SignUpRequest,
            SignInRequest,
            AuthResponse,
            MessageResponse,
            UsersResponse,
            ErrorBody,
            PublicPrincipal,
            Role
        )
    ),
    tags(
        (name = "gatehouse", description = "Authentication and admission-control gateway"),
        (name = "auth", description = "Sign-up, sign-in and sign-out"),
        (name = "users", description = "Registered principals"),
        (name = "health", description = "Liveness and store reachability"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

pub async fn openapi_json() -> impl IntoResponse {
    Json(openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_public_route() {
        let doc = openapi();
        for path in [
            "/api",
            "/health",
            "/api/auth/sign-up",
            "/api/auth/sign-in",
            "/api/auth/sign-out",
            "/api/users",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
    }
}
