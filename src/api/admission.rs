//! Admission middleware: every request is classified before it reaches a handler.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::USER_AGENT, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;
use tracing::{debug, error};

use super::AppState;
use crate::{
    admission::{Decision, RequestFacts, Tier},
    auth::types::ErrorBody,
    session::SessionTransport,
};

const UNKNOWN_CLIENT: &str = "unknown";

/// Extract a client IP from common proxy headers.
pub(crate) fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn client_ip(request: &Request<Body>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(ip) = forwarded_client_ip(request.headers()) {
            return ip;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |info| info.0.ip().to_string())
}

/// Role tier of a valid session token, guest otherwise.
fn resolve_tier(state: &AppState, headers: &HeaderMap) -> Tier {
    let Some(token) = SessionTransport::read(headers) else {
        return Tier::Guest;
    };
    match state.auth.tokens().verify(&token) {
        Ok(verified) => Tier::from(verified.claims.role),
        Err(err) => {
            debug!("Ignoring session token for tier resolution: {err}");
            Tier::Guest
        }
    }
}

fn facts(state: &AppState, request: &Request<Body>) -> RequestFacts {
    RequestFacts {
        arrived_at: state.clock.now(),
        client_ip: client_ip(request, state.trust_proxy),
        user_agent: request
            .headers()
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
        tier: resolve_tier(state, request.headers()),
    }
}

pub async fn guard(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let facts = facts(&state, &request);
    match state.admission.evaluate(&facts) {
        Ok(Decision::Allow) => next.run(request).await,
        Ok(Decision::Deny(reason)) => {
            let (error, message) = reason.public_body();
            (
                reason.status(),
                Json(ErrorBody::new(error).with_message(message)),
            )
                .into_response()
        }
        Err(err) => {
            error!(
                ip = %facts.client_ip,
                path = %facts.path,
                "Admission pipeline failed: {err}"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(
                    ErrorBody::new("Internal server error")
                        .with_message("Something went wrong with security middleware"),
                ),
            )
                .into_response()
        }
    }
}
