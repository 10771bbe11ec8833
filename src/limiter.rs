//! Tiered token-bucket rate limiting
//!
//! Slack groups its Web API methods into tiers, each with its own request
//! budget per minute. Every outbound call takes one token from the bucket of
//! its endpoint class before it is sent.
//!
//! Callers reserve their slot under a short lock and then sleep on a tokio
//! timer until the reserved instant, so concurrent waiters are admitted in
//! reservation order without polling.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metrics;

/// Named endpoint class sharing one request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No refill at all: only the burst is ever available.
    #[serde(alias = "none")]
    NoTier,
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl Tier {
    /// Requests per minute allowed by the service.
    pub fn per_minute(self) -> u32 {
        match self {
            Tier::NoTier => 0,
            Tier::Tier1 => 1,
            Tier::Tier2 => 20,
            Tier::Tier3 => 50,
            Tier::Tier4 => 100,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::NoTier => "notier",
            Tier::Tier1 => "tier1",
            Tier::Tier2 => "tier2",
            Tier::Tier3 => "tier3",
            Tier::Tier4 => "tier4",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn default_burst() -> u32 {
    1
}

/// Limiter settings for one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierLimit {
    pub tier: Tier,
    /// Tokens available at once.
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Extra requests per minute on top of the tier's own rate.
    #[serde(default)]
    pub boost: u32,
    /// Minimum gap between two admissions, 0 disables it.
    #[serde(default)]
    pub pause_ms: u64,
}

impl TierLimit {
    pub fn new(tier: Tier, burst: u32, boost: u32) -> Self {
        Self {
            tier,
            burst,
            boost,
            pause_ms: 0,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause_ms = pause.as_millis() as u64;
        self
    }

    pub fn per_minute(&self) -> u32 {
        self.tier.per_minute() + self.boost
    }

    /// Time to refill one token, `None` for a bucket that never refills.
    pub fn interval(&self) -> Option<Duration> {
        match self.per_minute() {
            0 => None,
            n => Some(Duration::from_secs(60) / n),
        }
    }

    pub fn pause(&self) -> Option<Duration> {
        (self.pause_ms > 0).then(|| Duration::from_millis(self.pause_ms))
    }
}

#[derive(Debug)]
struct Bucket {
    /// May go negative: every unit below zero is a queued reservation.
    tokens: f64,
    updated: Instant,
    last_grant: Option<Instant>,
    /// Set by a server-side rate limit: nobody is admitted before it.
    held_until: Option<Instant>,
}

/// A slot handed out by [`RateLimiter::reserve`].
#[derive(Debug, Clone, Copy)]
struct Reservation {
    ready_at: Instant,
    prev_grant: Option<Instant>,
}

impl Bucket {
    fn refill(&mut self, now: Instant, interval: Option<Duration>, burst: f64) {
        if let Some(interval) = interval {
            let elapsed = now.saturating_duration_since(self.updated);
            let earned = elapsed.as_secs_f64() / interval.as_secs_f64();
            self.tokens = (self.tokens + earned).min(burst);
        }
        self.updated = now;
    }
}

/// Token bucket for one endpoint class.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    limit: TierLimit,
    interval: Option<Duration>,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(name: &'static str, limit: TierLimit) -> Self {
        let burst = limit.burst.max(1);
        Self {
            name,
            limit: TierLimit { burst, ..limit },
            interval: limit.interval(),
            state: Mutex::new(Bucket {
                tokens: f64::from(burst),
                updated: Instant::now(),
                last_grant: None,
                held_until: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limit(&self) -> TierLimit {
        self.limit
    }

    /// Wait for one token.
    ///
    /// Returns [`Error::Cancelled`] as soon as `cancel` fires, handing the
    /// reserved token back. A bucket that never refills fails with
    /// [`Error::LimiterExhausted`] once its burst is spent.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled("rate limiter", self.name));
        }

        let reservation = self.reserve()?;
        let ready_at = reservation.ready_at;
        let now = Instant::now();
        if ready_at <= now {
            return Ok(());
        }

        let wait = ready_at - now;
        debug!(limiter = self.name, ?wait, "waiting for rate limit token");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.release(reservation);
                Err(Error::cancelled("rate limiter", self.name))
            }
            _ = sleep_until(ready_at) => {
                metrics::record_limiter_wait(self.name, wait);
                Ok(())
            }
        }
    }

    /// Keep every caller out until `delay` from now.
    ///
    /// Used when the server answers with a rate limit: the whole endpoint
    /// class backs off, not only the call that was refused.
    pub fn hold_off(&self, delay: Duration) {
        if let Ok(mut bucket) = self.state.lock() {
            let until = Instant::now() + delay;
            bucket.held_until = Some(bucket.held_until.map_or(until, |held| held.max(until)));
            debug!(limiter = self.name, ?delay, "holding off after server rate limit");
        }
    }

    fn reserve(&self) -> Result<Reservation> {
        let mut bucket = self
            .state
            .lock()
            .map_err(|_| Error::Internal(format!("limiter {} lock poisoned", self.name)))?;

        let now = Instant::now();
        bucket.refill(now, self.interval, f64::from(self.limit.burst));

        let mut ready_at = if bucket.tokens >= 1.0 {
            now
        } else {
            let interval = self
                .interval
                .ok_or_else(|| Error::LimiterExhausted(self.name.to_string()))?;
            now + interval.mul_f64(1.0 - bucket.tokens)
        };
        bucket.tokens -= 1.0;

        if let Some(held) = bucket.held_until {
            ready_at = ready_at.max(held);
        }

        let prev_grant = bucket.last_grant;
        if let Some(pause) = self.limit.pause() {
            if let Some(last) = prev_grant {
                ready_at = ready_at.max(last + pause);
            }
            bucket.last_grant = Some(ready_at);
        }

        Ok(Reservation {
            ready_at,
            prev_grant,
        })
    }

    /// Hand back an unused reservation.
    fn release(&self, reservation: Reservation) {
        if let Ok(mut bucket) = self.state.lock() {
            bucket.tokens = (bucket.tokens + 1.0).min(f64::from(self.limit.burst));
            // Only the latest grant can be rolled back; later ones already
            // spaced themselves from it.
            if bucket.last_grant == Some(reservation.ready_at) {
                bucket.last_grant = reservation.prev_grant;
            }
        }
    }
}

/// Default limits for history and replies (Tier 3 plus boost).
pub const DEFAULT_CONVERSATIONS_LIMIT: TierLimit = TierLimit {
    tier: Tier::Tier3,
    burst: 1,
    boost: 120,
    pause_ms: 0,
};

/// Default limit for user lookups.
pub const DEFAULT_USERS_LIMIT: TierLimit = TierLimit {
    tier: Tier::Tier4,
    burst: 1,
    boost: 0,
    pause_ms: 0,
};

/// One limiter per endpoint class, shared by every dump in the process.
#[derive(Debug, Clone)]
pub struct Limiters {
    pub conversations: Arc<RateLimiter>,
    pub replies: Arc<RateLimiter>,
    pub users: Arc<RateLimiter>,
}

impl Limiters {
    pub fn new(conversations: TierLimit, replies: TierLimit, users: TierLimit) -> Self {
        Self {
            conversations: Arc::new(RateLimiter::new("conversations", conversations)),
            replies: Arc::new(RateLimiter::new("replies", replies)),
            users: Arc::new(RateLimiter::new("users", users)),
        }
    }
}

impl Default for Limiters {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONVERSATIONS_LIMIT,
            DEFAULT_CONVERSATIONS_LIMIT,
            DEFAULT_USERS_LIMIT,
        )
    }
}
