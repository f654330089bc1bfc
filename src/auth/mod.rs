//! Sign-up, sign-in and sign-out flows.
//!
//! The orchestrator owns no state of its own: it validates input, consults the store,
//! hashes or verifies the password on the blocking pool, signs a token and turns it into
//! a `Set-Cookie` header. Unknown email and wrong password are reported identically.

pub mod state;
pub mod types;
pub mod validation;

use axum::http::HeaderMap;
use secrecy::SecretString;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::{
    hasher::{CredentialHasher, HashingError},
    session::{SessionError, SessionTransport},
    store::{NewPrincipal, PrincipalStore, PublicPrincipal, StoreError},
    token::{Claims, SignedToken, TokenError, TokenService},
};
pub use state::{AuthConfig, Environment};
use types::{SignInRequest, SignUpRequest};
pub use validation::ValidationError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("principal with this email already exists")]
    DuplicateIdentity,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Hashing(#[from] HashingError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate => Self::DuplicateIdentity,
            other => Self::Store(other),
        }
    }
}

/// Result of a successful sign-up or sign-in.
#[derive(Debug)]
pub struct Authenticated {
    pub principal: PublicPrincipal,
    pub token: SignedToken,
    /// Carries the `Set-Cookie` for the new session.
    pub headers: HeaderMap,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn PrincipalStore>,
    hasher: Arc<CredentialHasher>,
    tokens: Arc<TokenService>,
    session: SessionTransport,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("store", &self.store.kind())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn PrincipalStore>,
        hasher: Arc<CredentialHasher>,
        tokens: Arc<TokenService>,
        session: SessionTransport,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            session,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PrincipalStore> {
        &self.store
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Create a principal and open a session for it.
    ///
    /// # Errors
    /// `Validation` and `DuplicateIdentity` are caller errors; anything else is internal.
    #[instrument(skip(self, request))]
    pub async fn register(&self, request: SignUpRequest) -> Result<Authenticated, AuthError> {
        let input = validation::validate_sign_up(request)?;

        if self.store.find_by_email(&input.email).await?.is_some() {
            info!("Sign-up rejected: email already registered");
            return Err(AuthError::DuplicateIdentity);
        }

        let password_hash = self.hash(input.password).await?;
        let principal = self
            .store
            .create(NewPrincipal {
                name: input.name,
                email: input.email,
                password_hash,
                role: input.role,
            })
            .await?;

        // The principal is persisted from here on; a failure below leaves it in place.
        let authenticated = self.open_session(PublicPrincipal::from(&principal))?;
        info!(principal_id = %principal.id, role = %principal.role, "Principal registered");
        Ok(authenticated)
    }

    /// Check credentials and open a session.
    ///
    /// # Errors
    /// `Validation` and `InvalidCredentials` are caller errors; anything else is internal.
    #[instrument(skip(self, request))]
    pub async fn authenticate(&self, request: SignInRequest) -> Result<Authenticated, AuthError> {
        let input = validation::validate_sign_in(request)?;

        let Some(principal) = self.store.find_by_email(&input.email).await? else {
            self.verify_decoy(input.password).await?;
            info!("Sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .verify(input.password, principal.password_hash.clone())
            .await?
        {
            info!("Sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        }

        let authenticated = self.open_session(PublicPrincipal::from(&principal))?;
        info!(principal_id = %principal.id, "Principal signed in");
        Ok(authenticated)
    }

    /// Headers that clear the session cookie. Issued tokens stay valid until they expire.
    ///
    /// # Errors
    /// Returns `Session` if the clearing header cannot be built.
    pub fn terminate(&self) -> Result<HeaderMap, AuthError> {
        let mut headers = HeaderMap::new();
        self.session.clear(&mut headers)?;
        info!("Session cookie cleared");
        Ok(headers)
    }

    fn open_session(&self, principal: PublicPrincipal) -> Result<Authenticated, AuthError> {
        let token = self
            .tokens
            .sign(&Claims {
                id: principal.id,
                email: principal.email.clone(),
                role: principal.role,
            })
            .map_err(|err| {
                error!("Failed to sign session token: {err}");
                err
            })?;
        let mut headers = HeaderMap::new();
        self.session.attach(&mut headers, &token.token)?;
        Ok(Authenticated {
            principal,
            token,
            headers,
        })
    }

    async fn hash(&self, password: SecretString) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let hashed = tokio::task::spawn_blocking(move || hasher.hash(&password)).await??;
        Ok(hashed)
    }

    async fn verify(&self, password: SecretString, hashed: String) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let matches =
            tokio::task::spawn_blocking(move || hasher.verify(&password, &hashed)).await??;
        Ok(matches)
    }

    async fn verify_decoy(&self, password: SecretString) -> Result<(), AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify_decoy(&password)).await??;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        clock::{Clock, ManualClock},
        hasher::HashCost,
        store::{MemoryPrincipalStore, Principal, Role},
    };
    use async_trait::async_trait;
    use axum::http::header::SET_COOKIE;
    use chrono::{DateTime, TimeDelta};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryPrincipalStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PrincipalStore for CountingStore {
        async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.find_by_email(email).await
        }

        async fn create(&self, fields: NewPrincipal) -> Result<Principal, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.create(fields).await
        }

        async fn list(&self) -> Result<Vec<Principal>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.list().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn kind(&self) -> &'static str {
            "counting"
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"),
        ))
    }

    fn service_with(store: Arc<dyn PrincipalStore>, clock: Arc<dyn Clock>) -> AuthService {
        let hasher = CredentialHasher::new(HashCost {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let tokens = TokenService::new(
            SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
            TimeDelta::seconds(86_400),
            clock,
        )
        .unwrap();
        AuthService::new(
            store,
            Arc::new(hasher),
            Arc::new(tokens),
            AuthConfig::new(Environment::Production).session_transport(),
        )
    }

    fn service() -> AuthService {
        service_with(Arc::new(MemoryPrincipalStore::new()), clock())
    }

    fn sign_up(email: &str, password: &str) -> SignUpRequest {
        SignUpRequest {
            name: Some("Alice".to_string()),
            email: Some(email.to_string()),
            password: Some(SecretString::from(password.to_string())),
            role: None,
        }
    }

    fn sign_in(email: &str, password: &str) -> SignInRequest {
        SignInRequest {
            email: Some(email.to_string()),
            password: Some(SecretString::from(password.to_string())),
        }
    }

    #[tokio::test]
    async fn register_issues_a_session() {
        let service = service();
        let registered = service.register(sign_up("Alice@X.com", "secret1")).await.unwrap();
        assert_eq!(registered.principal.email, "alice@x.com");
        assert_eq!(registered.principal.role, Role::User);

        let cookie = registered
            .headers
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap();
        assert!(cookie.starts_with(&format!("token={};", registered.token.token)));

        let verified = service.tokens().verify(&registered.token.token).unwrap();
        assert_eq!(verified.claims.id, registered.principal.id);
        assert_eq!(verified.claims.email, "alice@x.com");
    }

    #[tokio::test]
    async fn invalid_email_never_touches_the_store() {
        let store = Arc::new(CountingStore::default());
        let service = service_with(store.clone(), clock());
        let result = service.register(sign_up("invalid-email", "secret1")).await;
        match result {
            Err(AuthError::Validation(err)) => {
                assert_eq!(err.details, vec!["Invalid email".to_string()]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_email_is_its_own_outcome() {
        let service = service();
        service.register(sign_up("a@x.com", "secret1")).await.unwrap();
        let again = service.register(sign_up("A@X.COM", "secret2")).await;
        assert!(matches!(again, Err(AuthError::DuplicateIdentity)));
    }

    #[test]
    fn store_duplicate_maps_to_duplicate_identity() {
        assert!(matches!(
            AuthError::from(StoreError::Duplicate),
            AuthError::DuplicateIdentity
        ));
    }

    #[tokio::test]
    async fn authenticate_round_trip() {
        let service = service();
        let registered = service.register(sign_up("a@x.com", "secret1")).await.unwrap();
        let signed_in = service.authenticate(sign_in(" A@x.com ", "secret1")).await.unwrap();
        assert_eq!(signed_in.principal.id, registered.principal.id);
        assert!(signed_in.headers.get(SET_COOKIE).is_some());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let service = service();
        service.register(sign_up("a@x.com", "secret1")).await.unwrap();

        let wrong_password = service.authenticate(sign_in("a@x.com", "nope123")).await;
        let unknown = service.authenticate(sign_in("b@x.com", "secret1")).await;

        let wrong_password = wrong_password.err().map(|err| err.to_string());
        let unknown = unknown.err().map(|err| err.to_string());
        assert_eq!(wrong_password, Some("invalid credentials".to_string()));
        assert_eq!(wrong_password, unknown);
    }

    #[tokio::test]
    async fn unknown_email_still_runs_a_verification() {
        let service = service();
        service.register(sign_up("a@x.com", "secret1")).await.unwrap();

        let before = service.hasher.verifications();
        let unknown = service.authenticate(sign_in("b@x.com", "secret1")).await;
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
        assert_eq!(service.hasher.verifications(), before + 1);

        let wrong_password = service.authenticate(sign_in("a@x.com", "nope123")).await;
        assert!(matches!(wrong_password, Err(AuthError::InvalidCredentials)));
        assert_eq!(service.hasher.verifications(), before + 2);
    }

    #[tokio::test]
    async fn malformed_stored_hash_is_an_internal_error() {
        let store = Arc::new(MemoryPrincipalStore::new());
        store
            .create(NewPrincipal {
                name: "Broken".to_string(),
                email: "broken@x.com".to_string(),
                password_hash: "not-a-phc-string".to_string(),
                role: Role::User,
            })
            .await
            .unwrap();
        let service = service_with(store, clock());
        let result = service.authenticate(sign_in("broken@x.com", "secret1")).await;
        assert!(matches!(
            result,
            Err(AuthError::Hashing(HashingError::MalformedHash))
        ));
    }

    #[tokio::test]
    async fn issued_token_expires_after_ttl() {
        let clock = clock();
        let service = service_with(Arc::new(MemoryPrincipalStore::new()), clock.clone());
        let registered = service.register(sign_up("a@x.com", "secret1")).await.unwrap();
        clock.advance(TimeDelta::seconds(86_400));
        assert!(matches!(
            service.tokens().verify(&registered.token.token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn terminate_clears_cookie() {
        let headers = service().terminate().unwrap();
        let cookie = headers
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap();
        assert!(cookie.starts_with("token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
