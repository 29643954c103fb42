// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request admission limits.
//!
//! Two limits gate every item request. A per-principal segmented sliding
//! window caps sustained request rate across all of a principal's
//! connections, and a per-connection token bucket absorbs bursts on a single
//! connection. Hello and health checks bypass both.
//!
//! Rejections report the principal window's numbers with a reset one full
//! window away; per-segment accounting is not exposed to clients.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use itemwire_protocol::wire;

/// Window key used for connections that have not said hello.
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the per-principal sliding window.
#[derive(Debug, Clone)]
pub struct SlidingWindowConfig {
    /// Requests allowed per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
    /// Segments the window is divided into.
    pub segments: u32,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            segments: 12,
        }
    }
}

/// Tuning for the per-connection token bucket.
#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Tokens the bucket holds when full.
    pub capacity: u32,
    /// Tokens added per refill interval.
    pub refill_amount: u32,
    /// How often tokens are added. Refills land in whole intervals; there is
    /// no fractional accrual between them.
    pub refill_interval: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_amount: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed {
        /// Configured limit.
        limit: u32,
        /// Remaining requests in the window, after this one.
        remaining: u32,
    },
    /// Request is rejected.
    Limited {
        /// Configured limit.
        limit: u32,
        /// Seconds until the client should retry.
        retry_after_secs: u64,
    },
}

impl RateLimitResult {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

// ============================================================================
// Sliding Window
// ============================================================================

struct Segment {
    index: u64,
    count: u32,
}

/// Segmented sliding window counting requests for one principal.
pub struct SlidingWindowLimiter {
    config: SlidingWindowConfig,
    started: Instant,
    segments: Mutex<VecDeque<Segment>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with its window starting now.
    pub fn new(config: SlidingWindowConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            segments: Mutex::new(VecDeque::new()),
        }
    }

    fn segment_len_ms(&self) -> u64 {
        let window_ms = self.config.window.as_millis() as u64;
        (window_ms / u64::from(self.config.segments.max(1))).max(1)
    }

    /// Count one request against the window.
    pub async fn check(&self) -> RateLimitResult {
        let current = self.started.elapsed().as_millis() as u64 / self.segment_len_ms();
        let span = u64::from(self.config.segments.max(1));

        let mut segments = self.segments.lock().await;

        // Drop segments that slid out of the window
        let oldest_live = current.saturating_sub(span - 1);
        while segments.front().is_some_and(|s| s.index < oldest_live) {
            segments.pop_front();
        }

        let total: u32 = segments.iter().map(|s| s.count).sum();
        if total >= self.config.max_requests {
            return RateLimitResult::Limited {
                limit: self.config.max_requests,
                retry_after_secs: self.config.window.as_secs(),
            };
        }

        match segments.back_mut() {
            Some(segment) if segment.index == current => segment.count += 1,
            _ => segments.push_back(Segment {
                index: current,
                count: 1,
            }),
        }

        RateLimitResult::Allowed {
            limit: self.config.max_requests,
            remaining: self.config.max_requests - total - 1,
        }
    }
}

// ============================================================================
// Token Bucket
// ============================================================================

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// Per-connection burst limiter. Starts full; rejected requests are not
/// queued.
pub struct TokenBucket {
    config: TokenBucketConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: TokenBucketConfig) -> Self {
        let tokens = config.capacity;
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if any are available.
    pub async fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let interval_ms = self.config.refill_interval.as_millis().max(1);
        let elapsed_ms = now.duration_since(state.last_refill).as_millis();
        let periods = elapsed_ms / interval_ms;
        if periods > 0 {
            let added = periods.saturating_mul(u128::from(self.config.refill_amount));
            if added >= u128::from(self.config.capacity - state.tokens) {
                state.tokens = self.config.capacity;
                state.last_refill = now;
            } else {
                state.tokens += added as u32;
                state.last_refill += self.config.refill_interval * (periods as u32);
            }
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Per-principal window limiters, created on first use.
pub struct RateLimiterRegistry {
    config: SlidingWindowConfig,
    limiters: RwLock<HashMap<String, Arc<SlidingWindowLimiter>>>,
}

impl RateLimiterRegistry {
    /// Create a registry handing out windows with the given tuning.
    pub fn new(config: SlidingWindowConfig) -> Self {
        Self {
            config,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Count one request against the principal's window.
    ///
    /// Connections that have not identified themselves share one
    /// [`ANONYMOUS_PRINCIPAL`] window.
    pub async fn check(&self, principal: Option<&str>) -> RateLimitResult {
        let key = principal
            .filter(|p| !p.is_empty())
            .unwrap_or(ANONYMOUS_PRINCIPAL);
        let limiter = self.get_or_create(key).await;
        limiter.check().await
    }

    async fn get_or_create(&self, key: &str) -> Arc<SlidingWindowLimiter> {
        // Fast path: limiter exists
        {
            let limiters = self.limiters.read().await;
            if let Some(limiter) = limiters.get(key) {
                return Arc::clone(limiter);
            }
        }

        // Slow path: create, double-checking after taking the write lock
        let mut limiters = self.limiters.write().await;
        if let Some(limiter) = limiters.get(key) {
            return Arc::clone(limiter);
        }

        let limiter = Arc::new(SlidingWindowLimiter::new(self.config.clone()));
        limiters.insert(key.to_string(), Arc::clone(&limiter));
        limiter
    }

    /// Wire payload sent with any admission rejection.
    ///
    /// Always reports the window limit with zero remaining and a reset one
    /// full window away, whichever limiter rejected the request.
    pub fn rejection_info(&self) -> wire::RateLimitInfo {
        let reset_at = Utc::now()
            + chrono::Duration::milliseconds(self.config.window.as_millis() as i64);
        wire::RateLimitInfo {
            limit: self.config.max_requests,
            remaining: 0,
            reset_at_ms: reset_at.timestamp_millis(),
        }
    }
}

impl std::fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("config", &self.config)
            .field("limiters", &"<HashMap>")
            .finish()
    }
}
