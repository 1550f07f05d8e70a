use pressroom_core::{ApiError, ApiErrorKind, EngineConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configures retry behaviour for transient model API failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts allowed after the first one.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RetryPolicy {
    /// Policy from the `[engine]` retry settings.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base_ms: config.retry_base_delay_ms,
            backoff_max_ms: config.retry_max_delay_ms,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Computes the backoff delay after the given zero-based retry index,
/// exponential and capped at `backoff_max_ms`.
pub fn compute_backoff(policy: &RetryPolicy, retry: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(retry));
    delay.min(policy.backoff_max_ms)
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make attempt number `next_attempt` (1-based).
    Retry {
        /// Attempt number that will follow the delay.
        next_attempt: u32,
        /// Time to wait first.
        delay: Duration,
    },
    /// Stop and surface this error.
    GiveUp(ApiError),
}

/// Retry state machine for one gateway invocation.
///
/// Tracks the attempt count and the last delay. Delays never decrease from
/// one retry to the next, and a server `Retry-After` can raise a delay up to
/// the policy cap but never beyond it.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
    last_delay: Duration,
}

impl RetryState {
    /// Fresh state before the first attempt.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            last_delay: Duration::ZERO,
        }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Classify the failure of the current attempt.
    pub fn on_failure(&mut self, err: ApiError) -> RetryDecision {
        let attempts = self.attempts.max(1);

        if err.kind != ApiErrorKind::Transient {
            return RetryDecision::GiveUp(ApiError { attempts, ..err });
        }
        if attempts >= self.policy.max_attempts() {
            return RetryDecision::GiveUp(ApiError::exhausted(err, attempts));
        }

        let backoff = Duration::from_millis(compute_backoff(&self.policy, attempts - 1));
        let cap = Duration::from_millis(self.policy.backoff_max_ms);
        let requested = err
            .retry_after_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO)
            .min(cap);
        let delay = backoff.max(requested).max(self.last_delay);
        self.last_delay = delay;

        RetryDecision::Retry {
            next_attempt: attempts + 1,
            delay,
        }
    }
}
