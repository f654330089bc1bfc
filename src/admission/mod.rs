//! Per-request admission control.
//!
//! A request is described once by [`RequestFacts`] and then handed to an ordered list of
//! [`Stage`]s. The first stage that denies short-circuits the rest, so traffic rejected as
//! a bot or an attack never reaches the rate limiter's counters. A stage that cannot
//! reach a verdict returns [`AdmissionError`] and the caller must refuse the request.

pub mod bot;
pub mod rate_limit;
pub mod shield;

use axum::http::StatusCode;
use chrono::{DateTime, TimeDelta, Utc};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::Role;
use bot::{BotCategory, BotStage};
use rate_limit::{RateLimitPolicy, RateLimitStage, SlidingWindowLimiter};
use shield::ShieldStage;

pub const DEFAULT_WINDOW_SECONDS: i64 = 60;
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;
pub const DEFAULT_CLEANUP_INTERVAL: u64 = 100;

/// Rate-limit tier. Authenticated principals get their role's tier; everybody else is
/// a guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Admin,
    User,
    Guest,
}

impl Tier {
    pub const ALL: [Self; 3] = [Self::Admin, Self::User, Self::Guest];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Guest => "guest",
        }
    }
}

impl From<Role> for Tier {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => Self::Admin,
            Role::User => Self::User,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            "guest" => Ok(Self::Guest),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Whether a stage enforces its denials or only reports them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Live,
    DryRun,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "live" => Ok(Self::Live),
            "dry-run" | "dry_run" => Ok(Self::DryRun),
            other => Err(format!("unknown admission mode: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    Bot,
    Shield,
    RateLimit,
}

impl DenyReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Shield => "shield",
            Self::RateLimit => "rate_limit",
        }
    }

    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Bot | Self::Shield => StatusCode::FORBIDDEN,
            Self::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// `(error, message)` pair sent to the client. Bot and shield denials look the same
    /// from the outside.
    #[must_use]
    pub const fn public_body(self) -> (&'static str, &'static str) {
        match self {
            Self::Bot | Self::Shield => ("Forbidden", "Automated requests are not allowed"),
            Self::RateLimit => ("Too Many Requests", "Rate limit exceeded"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    Continue,
    Deny(DenyReason),
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("admission stage {stage} failed: {reason}")]
    Stage { stage: &'static str, reason: String },
}

/// Everything the stages may look at, captured once when the request arrives.
#[derive(Clone, Debug)]
pub struct RequestFacts {
    pub arrived_at: DateTime<Utc>,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub tier: Tier,
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn mode(&self) -> Mode;

    /// # Errors
    /// Returns `AdmissionError` when the stage cannot reach a verdict.
    fn evaluate(&self, facts: &RequestFacts) -> Result<StageOutcome, AdmissionError>;
}

#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    policy: RateLimitPolicy,
    window: TimeDelta,
    bot_allow: Vec<BotCategory>,
    mode: Mode,
    max_tracked_keys: usize,
    cleanup_interval: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            policy: RateLimitPolicy::default(),
            window: TimeDelta::seconds(DEFAULT_WINDOW_SECONDS),
            bot_allow: vec![BotCategory::SearchEngine],
            mode: Mode::Live,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl AdmissionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: TimeDelta) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_bot_allow(mut self, categories: Vec<BotCategory>) -> Self {
        self.bot_allow = categories;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_max_tracked_keys(mut self, max: usize) -> Self {
        self.max_tracked_keys = max;
        self
    }

    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: u64) -> Self {
        self.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    #[must_use]
    pub fn window(&self) -> TimeDelta {
        self.window
    }

    #[must_use]
    pub fn bot_allow(&self) -> &[BotCategory] {
        &self.bot_allow
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }
}

pub struct AdmissionPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl fmt::Debug for AdmissionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl AdmissionPipeline {
    #[must_use]
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Standard pipeline: bot, shield, rate limit.
    ///
    /// # Errors
    /// Returns an error if the shield patterns fail to compile or the window is not
    /// positive.
    pub fn from_config(config: &AdmissionConfig) -> anyhow::Result<Self> {
        let limiter = SlidingWindowLimiter::new(config.policy.clone(), config.window)?
            .with_max_tracked_keys(config.max_tracked_keys)
            .with_cleanup_interval(config.cleanup_interval);
        Ok(Self::new(vec![
            Box::new(BotStage::new(config.bot_allow.clone(), config.mode)),
            Box::new(ShieldStage::new(config.mode)?),
            Box::new(RateLimitStage::new(limiter, config.mode)),
        ]))
    }

    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run the stages in order.
    ///
    /// # Errors
    /// Returns the first `AdmissionError`; the request must then be refused.
    pub fn evaluate(&self, facts: &RequestFacts) -> Result<Decision, AdmissionError> {
        for stage in &self.stages {
            match stage.evaluate(facts)? {
                StageOutcome::Continue => {}
                StageOutcome::Deny(reason) => {
                    if stage.mode() == Mode::DryRun {
                        warn!(
                            stage = stage.name(),
                            reason = reason.as_str(),
                            ip = %facts.client_ip,
                            path = %facts.path,
                            "Admission denial ignored (dry-run)"
                        );
                        continue;
                    }
                    return Ok(Decision::Deny(reason));
                }
            }
        }
        debug!(ip = %facts.client_ip, tier = %facts.tier, "Request admitted");
        Ok(Decision::Allow)
    }
}
