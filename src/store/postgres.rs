use super::{NewPrincipal, Principal, PrincipalStore, Role, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Connection, PgPool, Row};
use std::time::Duration;
use tracing::{error, info_span, Instrument};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, name, email, password_hash, role, created_at, updated_at";

/// Postgres-backed principal store. Schema lives in `sql/schema.sql`.
#[derive(Clone, Debug)]
pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a lazily connected pool for `dsn`.
    ///
    /// # Errors
    /// Returns an error if the DSN cannot be parsed.
    pub fn connect_lazy(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .connect_lazy(dsn)?;
        Ok(Self::new(pool))
    }
}

fn principal_from_row(row: &sqlx::postgres::PgRow) -> Result<Principal, StoreError> {
    let role: String = row.try_get("role")?;
    let role = role.parse::<Role>().map_err(StoreError::InvalidRole)?;
    Ok(Principal {
        id: row.try_get::<Uuid, _>("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl PrincipalStore for PgPrincipalStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM principals WHERE email = $1");
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn create(&self, fields: NewPrincipal) -> Result<Principal, StoreError> {
        let query = format!(
            "INSERT INTO principals (id, name, email, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {SELECT_COLUMNS}"
        );
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "INSERT");
        let row = sqlx::query(&query)
            .bind(Uuid::now_v7())
            .bind(&fields.name)
            .bind(&fields.email)
            .bind(&fields.password_hash)
            .bind(fields.role.as_str())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Duplicate
                } else {
                    error!("Failed to insert principal: {err}");
                    StoreError::Database(err)
                }
            })?;
        principal_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Principal>, StoreError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM principals ORDER BY created_at DESC, id DESC");
        let span = info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await?;
        rows.iter().map(principal_from_row).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}
