//! # Gatehouse (authentication and admission control)
//!
//! `gatehouse` sits in front of business routes. Every request is classified by the
//! admission pipeline before anything else runs, and the auth endpoints issue
//! signed session tokens carried in a hardened cookie.
//!
//! ## Admission
//!
//! The pipeline is an ordered list of stages: bot detection, attack shield, then a
//! sliding-window rate limiter keyed by client address and role tier
//! (`admin` 20, `user` 10, `guest` 5 requests per minute). Cheap stages run first so
//! rejected traffic never consumes rate-limit budget. A stage fault fails closed.
//!
//! ## Credentials and tokens
//!
//! Passwords are hashed with Argon2id. Session tokens are HS256-signed compact tokens
//! carrying `{id, email, role}` with a fixed 24 hour lifetime. There is no server-side
//! session table: signing out clears the cookie and issued tokens live until expiry.

pub mod admission;
pub mod api;
pub mod auth;
pub mod cli;
pub mod clock;
pub mod hasher;
pub mod session;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
