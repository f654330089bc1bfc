//! Sliding-window rate limiting keyed by tier and client address.
//!
//! Each bucket keeps the arrival times of the requests it admitted inside the current
//! window. A request is admitted when fewer than the tier's limit remain after pruning,
//! and only admitted requests are recorded.
//!
//! Memory is bounded two ways: idle buckets are swept every `cleanup_interval` checks,
//! and the number of tracked buckets never exceeds `max_tracked_keys`. When a new bucket
//! would exceed the cap after a forced sweep, the bucket with the oldest latest arrival
//! is evicted so a new client is never locked out by a full map.

use super::{
    AdmissionError, DenyReason, Mode, RequestFacts, Stage, StageOutcome, Tier,
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_TRACKED_KEYS,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::{
    collections::{HashMap, VecDeque},
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_ADMIN_LIMIT: u32 = 20;
pub const DEFAULT_USER_LIMIT: u32 = 10;
pub const DEFAULT_GUEST_LIMIT: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("malformed rate limit entry: {0}")]
    Malformed(String),
    #[error("{0}")]
    UnknownTier(String),
    #[error("tier {0} is listed more than once")]
    DuplicateTier(Tier),
    #[error("tier {0} has no rate limit")]
    MissingTier(Tier),
    #[error("tier {0} must allow at least one request")]
    ZeroLimit(Tier),
    #[error("rate limit window must be positive")]
    Window,
}

/// Validated tier → limit table. Every tier is present and non-zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    admin: u32,
    user: u32,
    guest: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            admin: DEFAULT_ADMIN_LIMIT,
            user: DEFAULT_USER_LIMIT,
            guest: DEFAULT_GUEST_LIMIT,
        }
    }
}

impl RateLimitPolicy {
    /// # Errors
    /// Returns `PolicyError::ZeroLimit` if any tier allows no requests.
    pub fn new(admin: u32, user: u32, guest: u32) -> Result<Self, PolicyError> {
        for (tier, limit) in [(Tier::Admin, admin), (Tier::User, user), (Tier::Guest, guest)] {
            if limit == 0 {
                return Err(PolicyError::ZeroLimit(tier));
            }
        }
        Ok(Self { admin, user, guest })
    }

    #[must_use]
    pub const fn limit(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Admin => self.admin,
            Tier::User => self.user,
            Tier::Guest => self.guest,
        }
    }
}

impl FromStr for RateLimitPolicy {
    type Err = PolicyError;

    /// Parse `admin=20,user=10,guest=5`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut limits: HashMap<Tier, u32> = HashMap::new();
        for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (tier, limit) = entry
                .split_once('=')
                .ok_or_else(|| PolicyError::Malformed(entry.to_string()))?;
            let tier = tier.parse::<Tier>().map_err(PolicyError::UnknownTier)?;
            let limit = limit
                .trim()
                .parse::<u32>()
                .map_err(|_| PolicyError::Malformed(entry.to_string()))?;
            if limits.insert(tier, limit).is_some() {
                return Err(PolicyError::DuplicateTier(tier));
            }
        }
        let lookup = |tier: Tier| limits.get(&tier).copied().ok_or(PolicyError::MissingTier(tier));
        Self::new(
            lookup(Tier::Admin)?,
            lookup(Tier::User)?,
            lookup(Tier::Guest)?,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

type BucketKey = (Tier, String);

pub struct SlidingWindowLimiter {
    policy: RateLimitPolicy,
    window: TimeDelta,
    max_tracked_keys: usize,
    cleanup_interval: u64,
    buckets: Mutex<HashMap<BucketKey, VecDeque<DateTime<Utc>>>>,
    checks: AtomicU64,
}

impl std::fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("policy", &self.policy)
            .field("window", &self.window)
            .field("max_tracked_keys", &self.max_tracked_keys)
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

impl SlidingWindowLimiter {
    /// # Errors
    /// Returns `PolicyError::Window` if `window` is not positive.
    pub fn new(policy: RateLimitPolicy, window: TimeDelta) -> Result<Self, PolicyError> {
        if window <= TimeDelta::zero() {
            return Err(PolicyError::Window);
        }
        Ok(Self {
            policy,
            window,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            buckets: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn with_max_tracked_keys(mut self, max: usize) -> Self {
        self.max_tracked_keys = max.max(1);
        self
    }

    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: u64) -> Self {
        self.cleanup_interval = interval.max(1);
        self
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Admit or refuse one request arriving at `at`.
    ///
    /// Check and record happen under one lock, so concurrent requests for the same key
    /// cannot both take the last slot.
    ///
    /// # Errors
    /// Returns `AdmissionError` if the window start cannot be computed.
    pub fn check(
        &self,
        tier: Tier,
        characteristic: &str,
        at: DateTime<Utc>,
    ) -> Result<RateLimitDecision, AdmissionError> {
        let cutoff = at
            .checked_sub_signed(self.window)
            .ok_or_else(|| AdmissionError::Stage {
                stage: "rate_limit",
                reason: format!("window start before {at} is out of range"),
            })?;
        let limit = self.policy.limit(tier) as usize;

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        let count = self.checks.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % self.cleanup_interval == 0 {
            debug!(checks = count, "Running periodic rate limiter cleanup");
            sweep(&mut buckets, cutoff);
        }

        let key = (tier, characteristic.to_string());
        if !buckets.contains_key(&key) && buckets.len() >= self.max_tracked_keys {
            sweep(&mut buckets, cutoff);
            while buckets.len() >= self.max_tracked_keys {
                let Some(evicted) = stalest(&buckets) else {
                    break;
                };
                warn!(
                    tracked = buckets.len(),
                    evicted_tier = %evicted.0,
                    "Rate limiter is tracking the maximum number of clients, evicting the stalest"
                );
                buckets.remove(&evicted);
            }
        }

        let arrivals = buckets.entry(key).or_default();
        while arrivals.front().is_some_and(|arrival| *arrival <= cutoff) {
            arrivals.pop_front();
        }
        if arrivals.len() >= limit {
            return Ok(RateLimitDecision::Limited);
        }
        arrivals.push_back(at);
        Ok(RateLimitDecision::Allowed)
    }
}

/// Drop arrivals that left the window, then buckets that became empty.
fn sweep(buckets: &mut HashMap<BucketKey, VecDeque<DateTime<Utc>>>, cutoff: DateTime<Utc>) {
    buckets.retain(|_, arrivals| {
        while arrivals.front().is_some_and(|arrival| *arrival <= cutoff) {
            arrivals.pop_front();
        }
        !arrivals.is_empty()
    });
}

/// Key whose most recent arrival is the oldest.
fn stalest(buckets: &HashMap<BucketKey, VecDeque<DateTime<Utc>>>) -> Option<BucketKey> {
    buckets
        .iter()
        .min_by_key(|(_, arrivals)| arrivals.back().copied())
        .map(|(key, _)| key.clone())
}

#[derive(Debug)]
pub struct RateLimitStage {
    limiter: SlidingWindowLimiter,
    mode: Mode,
}

impl RateLimitStage {
    #[must_use]
    pub fn new(limiter: SlidingWindowLimiter, mode: Mode) -> Self {
        Self { limiter, mode }
    }
}

impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn evaluate(&self, facts: &RequestFacts) -> Result<StageOutcome, AdmissionError> {
        match self
            .limiter
            .check(facts.tier, &facts.client_ip, facts.arrived_at)?
        {
            RateLimitDecision::Allowed => Ok(StageOutcome::Continue),
            RateLimitDecision::Limited => {
                warn!(
                    reason = "rate_limit",
                    tier = %facts.tier,
                    ip = %facts.client_ip,
                    user_agent = facts.user_agent.as_deref().unwrap_or(""),
                    path = %facts.path,
                    "Rate limit exceeded"
                );
                Ok(StageOutcome::Deny(DenyReason::RateLimit))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }

    fn limiter() -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimitPolicy::default(), TimeDelta::seconds(60)).unwrap()
    }

    #[test]
    fn parses_policy_table() {
        let policy: RateLimitPolicy = "admin=20, user=10 ,guest=5".parse().unwrap();
        assert_eq!(policy, RateLimitPolicy::default());
        assert_eq!(policy.limit(Tier::Admin), 20);
        assert_eq!(policy.limit(Tier::User), 10);
        assert_eq!(policy.limit(Tier::Guest), 5);
    }

    #[test]
    fn rejects_incomplete_or_unknown_tables() {
        assert_eq!(
            "admin=20,user=10".parse::<RateLimitPolicy>(),
            Err(PolicyError::MissingTier(Tier::Guest))
        );
        assert!(matches!(
            "admin=20,user=10,guest=5,root=99".parse::<RateLimitPolicy>(),
            Err(PolicyError::UnknownTier(_))
        ));
        assert_eq!(
            "admin=20,user=10,guest=0".parse::<RateLimitPolicy>(),
            Err(PolicyError::ZeroLimit(Tier::Guest))
        );
        assert_eq!(
            "admin=20,admin=30,user=10,guest=5".parse::<RateLimitPolicy>(),
            Err(PolicyError::DuplicateTier(Tier::Admin))
        );
        assert!(matches!(
            "admin:20".parse::<RateLimitPolicy>(),
            Err(PolicyError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_positive_window() {
        assert!(matches!(
            SlidingWindowLimiter::new(RateLimitPolicy::default(), TimeDelta::zero()),
            Err(PolicyError::Window)
        ));
    }

    #[test]
    fn guest_window_slides() {
        let limiter = limiter();
        let t0 = start();
        for second in 0..5 {
            assert_eq!(
                limiter
                    .check(Tier::Guest, "10.0.0.1", t0 + TimeDelta::seconds(second))
                    .unwrap(),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter
                .check(Tier::Guest, "10.0.0.1", t0 + TimeDelta::seconds(30))
                .unwrap(),
            RateLimitDecision::Limited
        );
        // only the first arrival has expired
        assert_eq!(
            limiter
                .check(Tier::Guest, "10.0.0.1", t0 + TimeDelta::seconds(60))
                .unwrap(),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter
                .check(Tier::Guest, "10.0.0.1", t0 + TimeDelta::milliseconds(60_500))
                .unwrap(),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn denied_requests_do_not_extend_the_lockout() {
        let limiter = limiter();
        let t0 = start();
        for _ in 0..5 {
            assert_eq!(
                limiter.check(Tier::Guest, "10.0.0.3", t0).unwrap(),
                RateLimitDecision::Allowed
            );
        }
        for second in 1..60 {
            assert_eq!(
                limiter
                    .check(Tier::Guest, "10.0.0.3", t0 + TimeDelta::seconds(second))
                    .unwrap(),
                RateLimitDecision::Limited
            );
        }
        assert_eq!(
            limiter
                .check(Tier::Guest, "10.0.0.3", t0 + TimeDelta::seconds(60))
                .unwrap(),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn buckets_are_independent() {
        let limiter = limiter();
        let t0 = start();
        for _ in 0..5 {
            limiter.check(Tier::Guest, "10.0.0.1", t0).unwrap();
        }
        assert_eq!(
            limiter.check(Tier::Guest, "10.0.0.1", t0).unwrap(),
            RateLimitDecision::Limited
        );
        assert_eq!(
            limiter.check(Tier::Guest, "10.0.0.2", t0).unwrap(),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check(Tier::User, "10.0.0.1", t0).unwrap(),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn full_map_evicts_stalest_bucket_instead_of_denying() {
        let limiter = limiter().with_max_tracked_keys(2);
        let t0 = start();
        assert_eq!(
            limiter.check(Tier::Guest, "10.0.0.1", t0).unwrap(),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter
                .check(Tier::Guest, "10.0.0.2", t0 + TimeDelta::seconds(1))
                .unwrap(),
            RateLimitDecision::Allowed
        );
        let t2 = t0 + TimeDelta::seconds(2);
        assert_eq!(
            limiter.check(Tier::Admin, "203.0.113.7", t2).unwrap(),
            RateLimitDecision::Allowed
        );
        assert_eq!(limiter.tracked_keys(), 2);

        // 10.0.0.1 was the stalest and starts over; 10.0.0.2 keeps its history
        for _ in 0..4 {
            limiter.check(Tier::Guest, "10.0.0.2", t2).unwrap();
        }
        assert_eq!(
            limiter.check(Tier::Guest, "10.0.0.2", t2).unwrap(),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn many_addresses_cannot_lock_out_a_new_client() {
        let limiter = limiter().with_max_tracked_keys(10_000);
        let t0 = start();
        for i in 0..10_000 {
            assert_eq!(
                limiter
                    .check(Tier::Guest, &format!("2001:db8::{i:x}"), t0)
                    .unwrap(),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter
                .check(Tier::Admin, "203.0.113.7", t0 + TimeDelta::seconds(1))
                .unwrap(),
            RateLimitDecision::Allowed
        );
        assert_eq!(limiter.tracked_keys(), 10_000);
    }

    #[test]
    fn periodic_cleanup_drops_idle_buckets() {
        let limiter = limiter().with_cleanup_interval(3);
        let t0 = start();
        limiter.check(Tier::Guest, "10.0.0.1", t0).unwrap();
        limiter.check(Tier::Guest, "10.0.0.2", t0).unwrap();
        limiter.check(Tier::Guest, "10.0.0.3", t0).unwrap();
        assert_eq!(limiter.tracked_keys(), 3);
        // fourth check triggers the sweep
        limiter
            .check(Tier::Guest, "10.0.0.4", t0 + TimeDelta::seconds(120))
            .unwrap();
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(limiter());
        let t0 = start();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.check(Tier::User, "10.0.0.9", t0).unwrap())
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|decision| *decision == RateLimitDecision::Allowed)
            .count();
        assert_eq!(allowed, 10);
    }
}
