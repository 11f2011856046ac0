// floatbot - Float store-and-forward telemetry
// Copyright (c) 2025 Float Telemetry Developers
//
// Licensed under AGPL-3.0.
// See LICENSE file for details.

//! Retrying link operations
//!
//! A send over the satellite or radio link is repeated a configured number
//! of times before the whole uplink is declared failed and rolled back.

use std::fmt::Display;
use std::time::Duration;

/// Cap applied to growing delays
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// How often, and how patiently, an operation is repeated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryStrategy {
    /// Retries after the first attempt
    pub retries: u32,
    /// Pause before the first retry
    pub initial_delay: Duration,
    /// Growth between consecutive pauses; 1.0 keeps them constant
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryStrategy {
    /// Single attempt
    pub fn none() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    /// `retries` retries with a constant pause
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// `retries` retries, doubling the pause each time up to 30 s
    pub fn exponential(retries: u32, initial_delay: Duration) -> Self {
        Self {
            retries,
            initial_delay,
            multiplier: 2.0,
            max_delay: DEFAULT_MAX_DELAY.max(initial_delay),
        }
    }

    /// Total attempts including the first
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Pause after failed attempt `attempt` (0-based), or `None` when spent
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.retries {
            return None;
        }
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            return Some(self.max_delay);
        }
        Some(Duration::from_secs_f64(delay))
    }
}

/// Run `operation` until it succeeds or `strategy` runs out of retries
///
/// # Example
///
/// ```
/// use floatbot::recovery::{with_retry, RetryStrategy};
/// use std::time::Duration;
///
/// let strategy = RetryStrategy::fixed(3, Duration::ZERO);
/// let mut calls = 0;
/// let result = with_retry(&strategy, || {
///     calls += 1;
///     if calls < 3 { Err("busy") } else { Ok(calls) }
/// });
/// assert_eq!(result, Ok(3));
/// ```
pub fn with_retry<T, E, F>(strategy: &RetryStrategy, mut operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        let err = match operation() {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        let Some(delay) = strategy.delay_for_attempt(attempt) else {
            if attempt > 0 {
                log::debug!("giving up after {} attempts: {}", attempt + 1, err);
            }
            return Err(err);
        };
        log::debug!("attempt {} failed ({}), retrying in {:?}", attempt + 1, err, delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        attempt += 1;
    }
}
