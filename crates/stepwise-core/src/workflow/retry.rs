//! Retry policy resolution and backoff.
//!
//! A step's `retry` block, when present and enabled, overrides the workflow
//! policy. Otherwise the `retry` strategy retries with the policy's
//! `maxRetries`/`retryDelay` at a fixed delay, and every other strategy runs
//! each step once.

use std::time::Duration;

use stepwise_types::workflow::{BackoffType, ErrorPolicy, ErrorStrategy, WorkflowStep};

/// Effective retry settings for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: BackoffType,
    pub max_delay: Option<Duration>,
}

impl RetryPlan {
    /// Run once, never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
            backoff: BackoffType::Fixed,
            max_delay: None,
        }
    }

    pub fn resolve(step: &WorkflowStep, policy: &ErrorPolicy) -> Self {
        if let Some(retry) = step.retry.as_ref() {
            if !retry.enabled {
                return Self::none();
            }
            return Self {
                max_retries: retry.max_retries,
                delay: retry.delay.unwrap_or(Duration::ZERO),
                backoff: retry.backoff_type,
                max_delay: retry.max_delay,
            };
        }

        match policy.strategy {
            ErrorStrategy::Retry => Self {
                max_retries: policy.max_retries,
                delay: policy.retry_delay.unwrap_or(Duration::ZERO),
                backoff: BackoffType::Fixed,
                max_delay: None,
            },
            _ => Self::none(),
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let delay = match self.backoff {
            BackoffType::Fixed => self.delay,
            BackoffType::Linear => self.delay.saturating_mul(retry),
            BackoffType::Exponential => {
                let factor = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor)
            }
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}
