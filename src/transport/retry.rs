//! Retry policy with exponential backoff.

use crate::error::{E2eError, E2eResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configurable retry policy with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 retries, 1s initial delay, 2x backoff, 30s max.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a policy, rejecting shrinking backoff or an initial delay above the cap.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> E2eResult<Self> {
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(E2eError::InvalidPolicy(format!(
                "backoff factor must be a finite value >= 1.0, got {}",
                backoff_factor
            )));
        }
        if initial_delay > max_delay {
            return Err(E2eError::InvalidPolicy(format!(
                "initial delay {:?} exceeds max delay {:?}",
                initial_delay, max_delay
            )));
        }
        Ok(Self {
            max_retries,
            initial_delay,
            backoff_factor,
            max_delay,
        })
    }

    /// Aggressive policy for flaky connections: 5 retries, 0.5s initial, 1.5x backoff, 10s max.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(10),
        }
    }

    /// Fail immediately.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Look up a preset by name (`default`, `aggressive`, `none`).
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "default" => Some(Self::default()),
            "aggressive" => Some(Self::aggressive()),
            "none" => Some(Self::none()),
            _ => None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry `attempt` (0 = first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}
