// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconnection timing and terminal-fallback policy.
//!
//! Exponential backoff with bounded random jitter and a hard attempt cap.
//! The policy only decides *whether and when* to retry; actually destroying
//! and recreating the driver is the supervisor's job, and the supervisor
//! guarantees at most one retry is ever in flight.

use std::time::Duration;

use parley_config::model::ReconnectConfig;
use rand::Rng;
use tracing::debug;

/// Outcome of one failure notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule exactly one retry after `delay`.
    Retry { delay: Duration, attempt: u32 },
    /// The attempt budget is spent; the caller applies its exhaustion policy
    /// (process restart or degraded posture).
    Exhausted { attempts: u32 },
}

/// Owns the reconnect attempt counter and the backoff computation.
#[derive(Debug)]
pub struct ReconnectionPolicy {
    attempts: u32,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
}

impl ReconnectionPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Resets the counter (and thereby the backoff to its floor). Called on
    /// entering ready and on every fresh QR challenge.
    pub fn reset(&mut self) {
        if self.attempts != 0 {
            debug!(attempts = self.attempts, "reconnect counter reset");
        }
        self.attempts = 0;
    }

    /// Records one failure and decides what happens next.
    pub fn on_failure(&mut self) -> RetryDecision {
        self.attempts += 1;

        if self.attempts >= self.max_attempts {
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        RetryDecision::Retry {
            delay: self.delay_for(self.attempts),
            attempt: self.attempts,
        }
    }

    /// `min(initial * 2^(attempt-1) + jitter, max)`, jitter drawn uniformly
    /// from `0..=jitter_ms` to avoid thundering-herd reconnection.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_ms = (self.initial_delay.as_millis() as u64).saturating_mul(1u64 << exponent);

        let jitter_bound = self.jitter.as_millis() as u64;
        let jitter_ms = if jitter_bound == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_bound)
        };

        let capped = base_ms
            .saturating_add(jitter_ms)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }
}
