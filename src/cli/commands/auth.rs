use crate::{auth::Environment, hasher::HashCost, token::DEFAULT_TOKEN_TTL_SECONDS};
use anyhow::{anyhow, bail, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_HASH_MEMORY_KIB: &str = "hash-memory-kib";
pub const ARG_HASH_ITERATIONS: &str = "hash-iterations";
pub const ARG_HASH_PARALLELISM: &str = "hash-parallelism";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub environment: Environment,
    pub token_secret: SecretString,
    pub token_ttl_seconds: i64,
    pub hash_cost: HashCost,
    pub frontend_base_url: Option<String>,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the token secret is missing or a value is out of range.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let token_secret = match matches.get_one::<String>(ARG_TOKEN_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => bail!("missing required argument: --{ARG_TOKEN_SECRET}"),
        };

        let environment = matches
            .get_one::<String>(ARG_ENVIRONMENT)
            .map(|value| value.parse::<Environment>())
            .transpose()
            .map_err(|err| anyhow!(err))?
            .unwrap_or_default();

        let token_ttl_seconds = matches
            .get_one::<i64>(ARG_TOKEN_TTL_SECONDS)
            .copied()
            .unwrap_or(DEFAULT_TOKEN_TTL_SECONDS);
        if token_ttl_seconds <= 0 {
            bail!("--{ARG_TOKEN_TTL_SECONDS} must be positive");
        }

        let defaults = HashCost::default();
        let hash_cost = HashCost {
            memory_kib: matches
                .get_one::<u32>(ARG_HASH_MEMORY_KIB)
                .copied()
                .unwrap_or(defaults.memory_kib),
            iterations: matches
                .get_one::<u32>(ARG_HASH_ITERATIONS)
                .copied()
                .unwrap_or(defaults.iterations),
            parallelism: matches
                .get_one::<u32>(ARG_HASH_PARALLELISM)
                .copied()
                .unwrap_or(defaults.parallelism),
        };

        Ok(Self {
            environment,
            token_secret,
            token_ttl_seconds,
            hash_cost,
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment environment: development, production or test")
                .long_help(
                    "Deployment environment.\n\nOutside development the session cookie is marked Secure and internal error details are never returned to clients.",
                )
                .env("GATEHOUSE_ENV")
                .default_value("production"),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HS256 signing key for session tokens (at least 32 bytes)")
                .env("GATEHOUSE_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Session token and cookie lifetime in seconds")
                .env("GATEHOUSE_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_HASH_MEMORY_KIB)
                .long(ARG_HASH_MEMORY_KIB)
                .help("Argon2id memory cost in KiB")
                .env("GATEHOUSE_HASH_MEMORY_KIB")
                .default_value("19456")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_HASH_ITERATIONS)
                .long(ARG_HASH_ITERATIONS)
                .help("Argon2id iterations")
                .env("GATEHOUSE_HASH_ITERATIONS")
                .default_value("2")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_HASH_PARALLELISM)
                .long(ARG_HASH_PARALLELISM)
                .help("Argon2id lanes")
                .env("GATEHOUSE_HASH_PARALLELISM")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend origin allowed by CORS with credentials")
                .env("GATEHOUSE_FRONTEND_BASE_URL"),
        )
}
