//! In-process rate limiter.
//!
//! Uses the Governor crate's Generic Cell Rate Algorithm (GCRA) with one
//! state cell per identifier. A window of `limit` requests per `duration`
//! maps to a quota replenishing one cell every `duration / limit`, with a
//! burst of `limit`.
//!
//! Useful when no remote service is available (local development, single
//! instance deployments) and as a deterministic backend in tests. Decisions
//! are not shared between processes.
//!
//! # Memory
//!
//! Identifiers are client controlled (see [`crate::middleware::ip`]), so the
//! keyed state would otherwise grow with every new identifier. Every
//! `sweep_every` checks, entries whose window has fully replenished are
//! dropped and the map is shrunk. An entry in that state is
//! indistinguishable from a fresh one, so pruning never changes a decision.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tracing::debug;

use super::{RatelimitConfig, RatelimitResponse, Ratelimiter};
use crate::error::{ClientError, ClientResult};

/// Per-identifier limiter that reports remaining capacity on success.
type KeyedLimiter = RateLimiter<
    String,
    DefaultKeyedStateStore<String>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// Checks between two sweeps of expired identifiers.
pub const DEFAULT_SWEEP_EVERY: u64 = 1024;

/// Rate limiter deciding in-process.
pub struct LocalRatelimiter {
    limiter: KeyedLimiter,
    namespace: String,
    limit: u32,
    period: Duration,
    sweep_every: u64,
    checks: AtomicU64,
}

impl LocalRatelimiter {
    /// Create a limiter allowing `limit` requests per `duration` per identifier.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidConfig` if `limit` is 0 or the resulting
    /// replenish period rounds down to zero.
    pub fn new(limit: u32, duration: Duration) -> ClientResult<Self> {
        let burst = NonZeroU32::new(limit).ok_or_else(|| {
            ClientError::InvalidConfig("ratelimit limit must be greater than 0".to_string())
        })?;

        let period = duration / limit;
        let quota = Quota::with_period(period)
            .ok_or_else(|| {
                ClientError::InvalidConfig(format!(
                    "ratelimit duration {duration:?} is too short for {limit} requests"
                ))
            })?
            .allow_burst(burst);

        let limiter = RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>();

        Ok(Self {
            limiter,
            namespace: String::new(),
            limit,
            period,
            sweep_every: DEFAULT_SWEEP_EVERY,
            checks: AtomicU64::new(0),
        })
    }

    /// Create a limiter from the same parameters the remote one is built
    /// from. Only `namespace`, `limit` and `duration` apply.
    ///
    /// # Errors
    ///
    /// See [`LocalRatelimiter::new`].
    pub fn from_config(config: &RatelimitConfig) -> ClientResult<Self> {
        let mut limiter = Self::new(config.limit, config.duration)?;
        limiter.namespace = config.namespace.clone();
        Ok(limiter)
    }

    /// Sweep expired identifiers every `checks` checks (at least 1).
    pub fn with_sweep_every(mut self, checks: u64) -> Self {
        self.sweep_every = checks.max(1);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_identifiers(&self) -> usize {
        self.limiter.len()
    }

    /// Drop identifiers whose quota has fully replenished.
    pub fn retain_recent(&self) {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        debug!(
            namespace = %self.namespace,
            before,
            after = self.limiter.len(),
            "Swept expired rate limit identifiers"
        );
    }
}

#[async_trait]
impl Ratelimiter for LocalRatelimiter {
    async fn limit(&self, identifier: &str) -> ClientResult<RatelimitResponse> {
        let now_ms = Utc::now().timestamp_millis();
        let key = identifier.to_string();

        let response = match self.limiter.check_key(&key) {
            Ok(snapshot) => {
                let remaining = snapshot.remaining_burst_capacity();
                // Time until the spent cells have all been replenished.
                let spent = self.limit.saturating_sub(remaining);
                let refill = self.period.saturating_mul(spent);
                RatelimitResponse {
                    success: true,
                    limit: u64::from(self.limit),
                    remaining: u64::from(remaining),
                    reset: now_ms.saturating_add(millis(refill)),
                }
            }
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                RatelimitResponse {
                    success: false,
                    limit: u64::from(self.limit),
                    remaining: 0,
                    reset: now_ms.saturating_add(millis(wait)),
                }
            }
        };

        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % self.sweep_every == 0 {
            self.retain_recent();
        }

        Ok(response)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
