//! Principal persistence.
//!
//! The gateway only needs three operations from its user store: lookup by
//! normalized email, create, and list. A duplicate email must surface as
//! [`StoreError::Duplicate`] so the orchestrator can report it as its own outcome.

mod memory;
mod postgres;

pub use memory::MemoryPrincipalStore;
pub use postgres::PgPrincipalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Identity record as stored.
#[derive(Clone)]
pub struct Principal {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("role", &self.role)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Fields for a new principal; the email is already normalized and the password hashed.
#[derive(Clone)]
pub struct NewPrincipal {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Principal as shown to callers: no credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicPrincipal {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&Principal> for PublicPrincipal {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            name: principal.name.clone(),
            email: principal.email.clone(),
            role: principal.role,
            created_at: principal.created_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("principal with this email already exists")]
    Duplicate,
    #[error("invalid stored role: {0}")]
    InvalidRole(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Lookup by normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError>;

    /// Persist a new principal. Fails with `StoreError::Duplicate` if the email is taken.
    async fn create(&self, fields: NewPrincipal) -> Result<Principal, StoreError>;

    async fn list(&self) -> Result<Vec<Principal>, StoreError>;

    /// Cheap reachability check used by `/health`.
    async fn ping(&self) -> Result<(), StoreError>;

    fn kind(&self) -> &'static str;
}
