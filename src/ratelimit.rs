use dashmap::DashMap;
use thiserror::Error;

/// Fixed rate-limit window length.
pub const WINDOW_SECS: i64 = 60;

/// Named rate-limit policy. Windows are tracked independently per tier, so a
/// caller hitting both a strict and a standard route has two counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Strict,
    Standard,
}

impl Tier {
    pub fn limit(&self) -> u32 {
        match self {
            Tier::Strict => 30,
            Tier::Standard => 100,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Strict => "strict",
            Tier::Standard => "standard",
        }
    }
}

/// Outcome of an allowed request, reported back via rate-limit headers.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: i64,
}

#[derive(Debug, Error)]
#[error("too many requests from this IP/identity")]
pub struct RateLimited {
    pub limit: u32,
    pub reset_secs: i64,
}

#[derive(Debug)]
struct WindowBucket {
    window_start: i64,
    count: u32,
}

/// In-memory fixed-window counters keyed by (tier, identity-or-address).
/// Counters are lost on restart; limiting here is best-effort traffic
/// shaping, not a security boundary. DashMap entry locking keeps increments
/// atomic per key under concurrent hits.
pub struct RateLimiter {
    buckets: DashMap<(Tier, String), WindowBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Count one request against the tier window for `key`. Both allowed and
    /// rejected requests consume from the window.
    pub fn check(&self, tier: Tier, key: &str) -> Result<RateDecision, RateLimited> {
        self.check_at(tier, key, chrono::Utc::now().timestamp())
    }

    fn check_at(&self, tier: Tier, key: &str, now: i64) -> Result<RateDecision, RateLimited> {
        let mut bucket = self
            .buckets
            .entry((tier, key.to_string()))
            .or_insert_with(|| WindowBucket {
                window_start: now,
                count: 0,
            });

        if now - bucket.window_start >= WINDOW_SECS {
            bucket.window_start = now;
            bucket.count = 0;
        }

        bucket.count = bucket.count.saturating_add(1);

        let limit = tier.limit();
        let reset_secs = (bucket.window_start + WINDOW_SECS - now).max(0);

        if bucket.count > limit {
            Err(RateLimited { limit, reset_secs })
        } else {
            Ok(RateDecision {
                limit,
                remaining: limit - bucket.count,
                reset_secs,
            })
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
