//! Retry policy: a pure decision over the last error and the attempt count
//!
//! The engine asks the policy two things after a failed attempt: whether to
//! try again, and how long to wait first. Neither question touches the
//! network or the request.

use crate::http::error::Error;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default ceiling on retries per logical operation
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Computes the pause before the next attempt
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    /// `retries` is the number of retries already performed (0 before the
    /// first retry). `error` is `None` when no error preceded the attempt.
    fn delay_before_next_retry(&self, error: Option<&Error>, retries: u32) -> Duration;
}

/// Decides whether a failed attempt should be repeated
pub trait RetryCondition: Send + Sync + fmt::Debug {
    fn should_retry(&self, error: &Error, retries: u32, idempotent: bool) -> bool;
}

/// Exponential backoff with a throttling-aware base and random jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub throttled_base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction (0.0-1.0) of the delay added as random jitter
    pub jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            throttled_base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            jitter_factor: 0.2,
        }
    }
}

impl ExponentialBackoff {
    /// Delay without jitter
    pub fn base_delay_for(&self, error: Option<&Error>, retries: u32) -> Duration {
        let base = match error {
            Some(e) if e.is_throttling() => self.throttled_base_delay,
            _ => self.base_delay,
        };
        let multiplier = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        base.saturating_mul(multiplier).min(self.max_delay)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay_before_next_retry(&self, error: Option<&Error>, retries: u32) -> Duration {
        let delay = self.base_delay_for(error, retries);
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..self.jitter_factor);
        delay + Duration::from_secs_f64(delay.as_secs_f64() * jitter)
    }
}

/// Same pause before every retry
#[derive(Debug, Clone)]
pub struct FixedBackoff(pub Duration);

impl BackoffStrategy for FixedBackoff {
    fn delay_before_next_retry(&self, _error: Option<&Error>, _retries: u32) -> Duration {
        self.0
    }
}

/// Retry immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl BackoffStrategy for NoBackoff {
    fn delay_before_next_retry(&self, _error: Option<&Error>, _retries: u32) -> Duration {
        Duration::ZERO
    }
}

/// Retries transient failures
///
/// - transport failures, only for idempotent operations
/// - 500, 502, 503, 504
/// - throttling (429 and throttling error codes)
/// - clock skew, which the engine corrects before retrying
///
/// Every other 4xx is final.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryCondition;

impl RetryCondition for DefaultRetryCondition {
    fn should_retry(&self, error: &Error, _retries: u32, idempotent: bool) -> bool {
        match error {
            Error::Cancelled => false,
            Error::Client(e) => e.is_transport() && idempotent,
            Error::Service(e) => {
                matches!(e.status_code, 500 | 502 | 503 | 504) || e.is_throttling() || e.is_clock_skew()
            }
        }
    }
}

/// Never retry
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl RetryCondition for NeverRetry {
    fn should_retry(&self, _error: &Error, _retries: u32, _idempotent: bool) -> bool {
        false
    }
}

/// Bounded retry configuration for the engine
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Arc<dyn BackoffStrategy>,
    condition: Arc<dyn RetryCondition>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Arc<dyn BackoffStrategy>, condition: Arc<dyn RetryCondition>) -> Self {
        Self {
            max_retries,
            backoff,
            condition,
        }
    }

    /// Default condition and exponential backoff with the given ceiling
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::new(
            max_retries,
            Arc::new(ExponentialBackoff::default()),
            Arc::new(DefaultRetryCondition),
        )
    }

    pub fn no_retry() -> Self {
        Self::new(0, Arc::new(NoBackoff), Arc::new(NeverRetry))
    }

    pub fn backoff(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn condition(mut self, condition: impl RetryCondition + 'static) -> Self {
        self.condition = Arc::new(condition);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt should follow a failure
    ///
    /// The ceiling and the replayability check come first and cannot be
    /// overridden by the condition.
    pub fn should_retry(&self, error: &Error, retries: u32, idempotent: bool, replayable: bool) -> bool {
        if retries >= self.max_retries {
            return false;
        }
        if !replayable {
            tracing::debug!("request body is not replayable, not retrying");
            return false;
        }
        if matches!(error, Error::Cancelled) {
            return false;
        }
        self.condition.should_retry(error, retries, idempotent)
    }

    pub fn delay(&self, error: Option<&Error>, retries: u32) -> Duration {
        self.backoff.delay_before_next_retry(error, retries)
    }
}
