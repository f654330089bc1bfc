//! Maps validated CLI matches to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{admission, auth};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .filter(|v| !v.trim().is_empty());

    let auth_opts = auth::Options::parse(matches)?;
    let admission_opts = admission::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        environment: auth_opts.environment,
        token_secret: auth_opts.token_secret,
        token_ttl_seconds: auth_opts.token_ttl_seconds,
        hash_cost: auth_opts.hash_cost,
        frontend_base_url: auth_opts.frontend_base_url,
        admission: admission_opts.config,
        trust_proxy: admission_opts.trust_proxy,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        admission::{bot::BotCategory, Mode, Tier},
        auth::Environment,
    };
    use chrono::TimeDelta;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn clean_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("GATEHOUSE_DSN", None::<&str>),
                ("GATEHOUSE_TOKEN_SECRET", None),
                ("GATEHOUSE_ENV", None),
                ("GATEHOUSE_RATE_LIMITS", None),
                ("GATEHOUSE_RATE_LIMIT_WINDOW_SECONDS", None),
                ("GATEHOUSE_BOT_ALLOW", None),
                ("GATEHOUSE_ADMISSION_MODE", None),
                ("GATEHOUSE_TRUST_PROXY", None),
            ],
            f,
        );
    }

    #[test]
    fn token_secret_required() {
        clean_env(|| {
            let matches = crate::cli::commands::new().get_matches_from(vec!["gatehouse"]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err
                    .to_string()
                    .contains("missing required argument: --token-secret"));
            }
        });
    }

    #[test]
    fn defaults_build_a_server_action() {
        clean_env(|| {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "gatehouse",
                "--token-secret",
                SECRET,
            ]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected server action");
            };
            assert_eq!(args.port, 8080);
            assert_eq!(args.dsn, None);
            assert_eq!(args.environment, Environment::Production);
            assert_eq!(args.token_ttl_seconds, 86_400);
            assert_eq!(args.admission.policy().limit(Tier::Admin), 20);
            assert_eq!(args.admission.policy().limit(Tier::User), 10);
            assert_eq!(args.admission.policy().limit(Tier::Guest), 5);
            assert_eq!(args.admission.window(), TimeDelta::seconds(60));
            assert_eq!(args.admission.bot_allow(), &[BotCategory::SearchEngine]);
            assert_eq!(args.admission.mode(), Mode::Live);
            assert!(!args.trust_proxy);
        });
    }

    #[test]
    fn admission_overrides() {
        clean_env(|| {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "gatehouse",
                "--token-secret",
                SECRET,
                "--rate-limits",
                "admin=100,user=50,guest=1",
                "--rate-limit-window-seconds",
                "10",
                "--bot-allow",
                "search-engine,monitor",
                "--admission-mode",
                "dry-run",
                "--trust-proxy",
            ]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected server action");
            };
            assert_eq!(args.admission.policy().limit(Tier::Admin), 100);
            assert_eq!(args.admission.policy().limit(Tier::Guest), 1);
            assert_eq!(args.admission.window(), TimeDelta::seconds(10));
            assert_eq!(
                args.admission.bot_allow(),
                &[BotCategory::SearchEngine, BotCategory::Monitor]
            );
            assert_eq!(args.admission.mode(), Mode::DryRun);
            assert!(args.trust_proxy);
        });
    }

    #[test]
    fn empty_bot_allow_denies_every_category() {
        clean_env(|| {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "gatehouse",
                "--token-secret",
                SECRET,
                "--bot-allow",
                "",
            ]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected server action");
            };
            assert!(args.admission.bot_allow().is_empty());
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        for extra in [
            ["--rate-limits", "admin=20,user=10"],
            ["--rate-limit-window-seconds", "0"],
            ["--bot-allow", "crawler"],
            ["--environment", "staging"],
            ["--token-ttl-seconds", "0"],
        ] {
            clean_env(|| {
                let mut args = vec!["gatehouse", "--token-secret", SECRET];
                args.extend(extra);
                let matches = crate::cli::commands::new().get_matches_from(args);
                assert!(handler(&matches).is_err(), "{extra:?} should fail");
            });
        }
    }
}
