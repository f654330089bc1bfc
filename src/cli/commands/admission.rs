use crate::admission::{bot::BotCategory, rate_limit::RateLimitPolicy, AdmissionConfig, Mode};
use anyhow::{anyhow, bail, Context, Result};
use chrono::TimeDelta;
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_RATE_LIMITS: &str = "rate-limits";
pub const ARG_RATE_LIMIT_WINDOW_SECONDS: &str = "rate-limit-window-seconds";
pub const ARG_BOT_ALLOW: &str = "bot-allow";
pub const ARG_ADMISSION_MODE: &str = "admission-mode";
pub const ARG_TRUST_PROXY: &str = "trust-proxy";

#[derive(Debug, Clone)]
pub struct Options {
    pub config: AdmissionConfig,
    pub trust_proxy: bool,
}

impl Options {
    /// Parse admission arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a limit, category or mode cannot be parsed.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let mut config = AdmissionConfig::new();

        if let Some(limits) = matches.get_one::<String>(ARG_RATE_LIMITS) {
            let policy = limits
                .parse::<RateLimitPolicy>()
                .with_context(|| format!("invalid --{ARG_RATE_LIMITS}: {limits}"))?;
            config = config.with_policy(policy);
        }

        if let Some(&seconds) = matches.get_one::<i64>(ARG_RATE_LIMIT_WINDOW_SECONDS) {
            if seconds <= 0 {
                bail!("--{ARG_RATE_LIMIT_WINDOW_SECONDS} must be positive");
            }
            config = config.with_window(TimeDelta::seconds(seconds));
        }

        if let Some(allow) = matches.get_one::<String>(ARG_BOT_ALLOW) {
            let categories = allow
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::parse::<BotCategory>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|err| anyhow!(err))?;
            config = config.with_bot_allow(categories);
        }

        if let Some(mode) = matches.get_one::<String>(ARG_ADMISSION_MODE) {
            config = config.with_mode(mode.parse::<Mode>().map_err(|err| anyhow!(err))?);
        }

        Ok(Self {
            config,
            trust_proxy: matches.get_flag(ARG_TRUST_PROXY),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMITS)
                .long(ARG_RATE_LIMITS)
                .help("Requests per window for each tier")
                .env("GATEHOUSE_RATE_LIMITS")
                .default_value("admin=20,user=10,guest=5"),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .long(ARG_RATE_LIMIT_WINDOW_SECONDS)
                .help("Sliding window length in seconds")
                .env("GATEHOUSE_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_BOT_ALLOW)
                .long(ARG_BOT_ALLOW)
                .help("Comma separated bot categories let through: search_engine, monitor, preview, tool, headless, generic")
                .long_help(
                    "Comma separated bot categories let through the bot stage.\n\nAn empty value denies every automated client, search engines included.",
                )
                .env("GATEHOUSE_BOT_ALLOW")
                .default_value("search_engine"),
        )
        .arg(
            Arg::new(ARG_ADMISSION_MODE)
                .long(ARG_ADMISSION_MODE)
                .help("live enforces denials, dry-run only logs them")
                .env("GATEHOUSE_ADMISSION_MODE")
                .default_value("live")
                .value_parser(["live", "dry-run"]),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY)
                .long(ARG_TRUST_PROXY)
                .help("Take the client address from X-Forwarded-For / X-Real-IP")
                .env("GATEHOUSE_TRUST_PROXY")
                .action(ArgAction::SetTrue),
        )
}
