use crate::{
    admission::{AdmissionConfig, AdmissionPipeline},
    api::{self, AppState},
    auth::{AuthConfig, AuthService, Environment},
    clock::{Clock, SystemClock},
    hasher::{CredentialHasher, HashCost},
    store::{MemoryPrincipalStore, PgPrincipalStore, PrincipalStore},
    token::TokenService,
};
use anyhow::{Context, Result};
use chrono::TimeDelta;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub environment: Environment,
    pub token_secret: SecretString,
    pub token_ttl_seconds: i64,
    pub hash_cost: HashCost,
    pub frontend_base_url: Option<String>,
    pub admission: AdmissionConfig,
    pub trust_proxy: bool,
}

fn principal_store(dsn: Option<&str>) -> Result<Arc<dyn PrincipalStore>> {
    if let Some(dsn) = dsn {
        let store = PgPrincipalStore::connect_lazy(dsn).context("Failed to configure Postgres pool")?;
        return Ok(Arc::new(store));
    }

    warn!("No DSN configured, principals are kept in memory and lost on restart");

    Ok(Arc::new(MemoryPrincipalStore::new()))
}

/// Assemble every component from `args`.
///
/// # Errors
/// Returns an error if the hash cost, token secret or admission policy is rejected.
pub fn build_state(args: &Args, clock: Arc<dyn Clock>) -> Result<AppState> {
    let config = AuthConfig::new(args.environment)
        .with_token_ttl_seconds(args.token_ttl_seconds)
        .with_hash_cost(args.hash_cost);

    let store = principal_store(args.dsn.as_deref())?;

    let hasher = CredentialHasher::new(config.hash_cost()).context("Invalid Argon2id cost")?;

    let tokens = TokenService::new(
        args.token_secret.clone(),
        TimeDelta::seconds(config.token_ttl_seconds()),
        clock.clone(),
    )
    .context("Invalid token signing configuration")?;

    let auth = AuthService::new(
        store,
        Arc::new(hasher),
        Arc::new(tokens),
        config.session_transport(),
    );

    let admission =
        AdmissionPipeline::from_config(&args.admission).context("Invalid admission policy")?;

    info!(
        environment = %args.environment,
        store = auth.store().kind(),
        stages = ?admission.stage_names(),
        mode = ?args.admission.mode(),
        trust_proxy = args.trust_proxy,
        "Gatehouse configured"
    );

    Ok(
        AppState::new(auth, Arc::new(admission), clock, args.environment)
            .with_trust_proxy(args.trust_proxy),
    )
}

/// Execute the server action.
/// # Errors
/// Returns an error if configuration is rejected or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let state = build_state(&args, Arc::new(SystemClock))?;

    api::new(args.port, state, args.frontend_base_url.as_deref()).await
}
