// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry, backoff, and circuit breaker machinery for outbound calls.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::SdkError;

/// Reconnect backoff schedule. Attempts past the end reuse the final delay.
const RECONNECT_DELAYS: [Duration; 6] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
];

/// Delay before reconnect attempt `attempt` (0-based).
pub(crate) fn reconnect_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(RECONNECT_DELAYS.len() - 1);
    RECONNECT_DELAYS[idx]
}

/// Tuning for the call pipeline: retries, backoff, and the circuit breaker.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Retry attempts after the first failure (default: 4)
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per retry (default: 1 s)
    pub base_backoff: Duration,
    /// Fractional jitter applied to each backoff delay (default: 0.25 for ±25%)
    pub backoff_jitter: f64,
    /// Failure ratio above which the breaker opens (default: 0.5)
    pub breaker_failure_ratio: f64,
    /// Trailing window the ratio is computed over (default: 30 s)
    pub breaker_window: Duration,
    /// Minimum sampled calls before the breaker can open (default: 5)
    pub breaker_min_calls: usize,
    /// How long the breaker stays open before probing (default: 30 s)
    pub breaker_open_for: Duration,
    /// Count rate-limit rejections as breaker failures (default: false)
    pub count_rate_limited_in_breaker: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_backoff: Duration::from_secs(1),
            backoff_jitter: 0.25,
            breaker_failure_ratio: 0.5,
            breaker_window: Duration::from_secs(30),
            breaker_min_calls: 5,
            breaker_open_for: Duration::from_secs(30),
            count_rate_limited_in_breaker: false,
        }
    }
}

impl ResilienceConfig {
    /// Backoff delay before retry `attempt` (0-based), with jitter applied.
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter = self.backoff_jitter.clamp(0.0, 1.0);
        let factor = rand::rng().random_range(1.0 - jitter..=1.0 + jitter);
        exp.mul_f64(factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BreakerState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    /// Sampled call outcomes within the trailing window: (when, failed)
    samples: VecDeque<(Instant, bool)>,
}

/// Circuit breaker over a trailing sample window of call outcomes.
///
/// Closed until the failure ratio over the window exceeds the configured
/// threshold with enough samples. While open, `check` fails fast without
/// touching the network. After the break duration one probe call is admitted;
/// its outcome decides between closing again and another full break.
pub(crate) struct CircuitBreaker {
    failure_ratio: f64,
    window: Duration,
    min_calls: usize,
    open_for: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub(crate) fn new(config: &ResilienceConfig) -> Self {
        Self {
            failure_ratio: config.breaker_failure_ratio,
            window: config.breaker_window,
            min_calls: config.breaker_min_calls,
            open_for: config.breaker_open_for,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                samples: VecDeque::new(),
            }),
        }
    }

    /// Admission check before an attempt.
    ///
    /// Returns `Err(SdkError::CircuitOpen)` while the breaker is open or a
    /// half-open probe is already in flight. The first caller after the break
    /// duration elapses becomes the probe.
    pub(crate) fn check(&self) -> Result<(), SdkError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open { until } => {
                if Instant::now() >= until {
                    debug!("Circuit breaker half-open, admitting probe");
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(SdkError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => Err(SdkError::CircuitOpen),
        }
    }

    /// Record a successful sampled call.
    pub(crate) fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                info!("Circuit breaker closed after successful probe");
                inner.state = BreakerState::Closed;
                inner.samples.clear();
            }
            _ => {
                let now = Instant::now();
                inner.samples.push_back((now, false));
                self.prune(&mut inner, now);
            }
        }
    }

    /// Record a failed sampled call, opening the breaker when warranted.
    pub(crate) fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!(
                    open_for_ms = self.open_for.as_millis() as u64,
                    "Circuit breaker probe failed, reopening"
                );
                inner.state = BreakerState::Open {
                    until: now + self.open_for,
                };
            }
            _ => {
                inner.samples.push_back((now, true));
                self.prune(&mut inner, now);
                if inner.state == BreakerState::Closed && self.should_trip(&inner) {
                    warn!(
                        samples = inner.samples.len(),
                        open_for_ms = self.open_for.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                    inner.state = BreakerState::Open {
                        until: now + self.open_for,
                    };
                }
            }
        }
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        while let Some(&(when, _)) = inner.samples.front() {
            if now.duration_since(when) > self.window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        let total = inner.samples.len();
        if total < self.min_calls {
            return false;
        }
        let failures = inner.samples.iter().filter(|(_, failed)| *failed).count();
        failures as f64 > self.failure_ratio * total as f64
    }
}
