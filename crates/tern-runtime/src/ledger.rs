use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;
use tern_llm::UsageSnapshot;
use tracing::{debug, warn};

/// Why a round trip that should have hit the prompt cache did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheRegression {
    /// The previous request was recent, so the cached prefix no longer
    /// matches: checkpoints moved or earlier content changed.
    PrefixMismatch,
    /// Enough time passed for the provider to evict the cache.
    Expired,
}

impl fmt::Display for CacheRegression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrefixMismatch => f.write_str("cache miss: checkpoint/prefix mismatch"),
            Self::Expired => f.write_str("cache miss: cache expired"),
        }
    }
}

/// Running cost and cache telemetry for one session.
#[derive(Debug, Clone, Serialize)]
pub struct UsageLedger {
    total_cost: f64,
    has_seen_cache: bool,
    last_request_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    ttl: TimeDelta,
    round_trips: u64,
    prompt_tokens: u64,
    output_tokens: u64,
    cached_tokens: u64,
}

impl UsageLedger {
    /// `ttl_minutes` is the provider's cache lifetime used to tell an expired
    /// cache from a prefix mismatch.
    pub fn new(ttl_minutes: f64) -> Self {
        Self {
            total_cost: 0.0,
            has_seen_cache: false,
            last_request_at: None,
            ttl: TimeDelta::milliseconds((ttl_minutes.max(0.0) * 60_000.0) as i64),
            round_trips: 0,
            prompt_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
        }
    }

    /// Stamp an outbound request. Returns the time since the previous one.
    pub fn begin_request(&mut self, now: DateTime<Utc>) -> Option<TimeDelta> {
        let elapsed = self.last_request_at.map(|prev| now - prev);
        self.last_request_at = Some(now);
        elapsed
    }

    /// Fold one snapshot in and check for a cache regression.
    ///
    /// Advisory only: the result is logged and returned for display, it
    /// never changes what the caller does next.
    pub fn record(
        &mut self,
        usage: &UsageSnapshot,
        elapsed: Option<TimeDelta>,
    ) -> Option<CacheRegression> {
        self.total_cost += usage.cost_usd;
        self.round_trips += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.output_tokens += usage.output_tokens;
        self.cached_tokens += usage.cached_tokens;

        debug!(
            prompt = usage.prompt_tokens,
            output = usage.output_tokens,
            cached = usage.cached_tokens,
            cost = usage.cost_usd,
            total_cost = self.total_cost,
            "usage recorded"
        );

        if usage.cached_tokens > 0 {
            self.has_seen_cache = true;
            return None;
        }
        if !self.has_seen_cache {
            return None;
        }

        let margin = self.ttl - TimeDelta::minutes(1);
        let regression = match elapsed {
            Some(e) if e < margin => CacheRegression::PrefixMismatch,
            _ => CacheRegression::Expired,
        };
        warn!(
            elapsed_secs = elapsed.map(|e| e.num_seconds()),
            ttl_secs = self.ttl.num_seconds(),
            "{regression}"
        );
        Some(regression)
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn has_seen_cache(&self) -> bool {
        self.has_seen_cache
    }

    pub fn last_request_at(&self) -> Option<DateTime<Utc>> {
        self.last_request_at
    }

    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// One-line summary for the terminal.
    pub fn summary(&self) -> String {
        format!(
            "${:.4} over {} round trips ({} prompt, {} cached, {} output tokens)",
            self.total_cost,
            self.round_trips,
            self.prompt_tokens,
            self.cached_tokens,
            self.output_tokens
        )
    }
}
