// Dramabox Core - REST facade over the Dramabox mobile API
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Retry policy with exponential backoff
//!
//! Strategy:
//! - Maximum 4 attempts (1 initial + 3 retries)
//! - Exponential backoff: 1s, 2s, 4s, 8s, capped at 10s
//! - Retry on: transport failures and HTTP 408, 429, 500, 502, 503, 504
//! - No retry on: other 4xx, validation errors, soft rejections
//!
//! Callers drive an explicit loop with a [`RetryContext`] instead of calling
//! themselves recursively, so the attempt ceiling is visible at the call site:
//!
//! ```rust,ignore
//! let mut ctx = RetryContext::new();
//! loop {
//!     match attempt().await {
//!         Ok(value) => return Ok(value),
//!         Err(err) => match policy.schedule(&mut ctx, err) {
//!             Some(delay) => tokio::time::sleep(delay).await,
//!             None => return Err(ctx.into_error("operation")),
//!         },
//!     }
//! }
//! ```

use crate::error::DramaboxError;
use std::time::Duration;

/// Maximum retries after the initial attempt
pub const MAX_RETRIES: u32 = 3;

/// Backoff for the first retry
const BASE_DELAY_MS: u64 = 1000;

/// Upper bound for any single backoff
const MAX_DELAY_MS: u64 = 10_000;

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Total attempts a logical operation may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether the error is worth another attempt
    pub fn is_retryable(&self, error: &DramaboxError) -> bool {
        error.is_retryable()
    }

    /// `min(base * 2^attempt, max)` with a zero-indexed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Record a failed attempt and decide whether to go again
    ///
    /// Uses [`DramaboxError::is_retryable`] as the classifier. Returns the
    /// delay before the next attempt, or `None` when the error is terminal or
    /// the attempt budget is spent.
    pub fn schedule(&self, ctx: &mut RetryContext, error: DramaboxError) -> Option<Duration> {
        let retryable = self.is_retryable(&error);
        self.schedule_if(ctx, error, retryable)
    }

    /// Same as [`RetryPolicy::schedule`] with a caller-supplied classification
    pub fn schedule_if(&self, ctx: &mut RetryContext, error: DramaboxError, retryable: bool) -> Option<Duration> {
        ctx.last_error = Some(error);

        if !retryable {
            return None;
        }
        if ctx.attempt >= self.max_retries {
            ctx.exhausted = true;
            return None;
        }

        let delay = self.delay_for_attempt(ctx.attempt);
        ctx.attempt += 1;
        Some(delay)
    }
}

/// Attempt bookkeeping for a single logical operation
#[derive(Debug, Default)]
pub struct RetryContext {
    /// Zero-indexed attempt currently being made
    pub attempt: u32,
    pub last_error: Option<DramaboxError>,
    exhausted: bool,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to the next attempt without a backoff delay
    pub fn advance(&mut self, error: DramaboxError) {
        self.last_error = Some(error);
        self.attempt += 1;
    }

    /// Attempts made so far, including the current one
    pub fn attempts(&self) -> u32 {
        self.attempt + 1
    }

    /// True once the budget ran out on a retryable error
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Surface the final error
    ///
    /// Terminal errors come back unchanged; exhaustion wraps the last error
    /// with the operation name and attempt count.
    pub fn into_error(self, operation: &str) -> DramaboxError {
        let attempts = self.attempts();
        let last = self.last_error.unwrap_or_else(|| {
            DramaboxError::invalid_response(format!("{} failed without an error", operation), None)
        });

        if self.exhausted {
            DramaboxError::RetriesExhausted {
                operation: operation.to_string(),
                attempts,
                source: Box::new(last),
            }
        } else {
            last
        }
    }

    /// Take the last error without wrapping it
    pub fn into_last_error(self, operation: &str) -> DramaboxError {
        self.last_error.unwrap_or_else(|| {
            DramaboxError::invalid_response(format!("{} failed without an error", operation), None)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;

    fn timeout() -> DramaboxError {
        DramaboxError::transport(TransportErrorKind::Timeout, "timed out")
    }

    #[test]
    fn test_delay_sequence() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..4).map(|n| policy.delay_for_attempt(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(10_000));
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts(), 4);
    }

    #[test]
    fn test_schedule_exhausts_after_three_retries() {
        let policy = RetryPolicy::default();
        let mut ctx = RetryContext::new();

        assert_eq!(policy.schedule(&mut ctx, timeout()), Some(Duration::from_millis(1000)));
        assert_eq!(policy.schedule(&mut ctx, timeout()), Some(Duration::from_millis(2000)));
        assert_eq!(policy.schedule(&mut ctx, timeout()), Some(Duration::from_millis(4000)));
        assert_eq!(policy.schedule(&mut ctx, timeout()), None);

        assert!(ctx.is_exhausted());
        assert_eq!(ctx.attempts(), 4);
        match ctx.into_error("search") {
            DramaboxError::RetriesExhausted { operation, attempts, source } => {
                assert_eq!(operation, "search");
                assert_eq!(attempts, 4);
                assert_eq!(source.category(), "timeout");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_error_is_not_wrapped() {
        let policy = RetryPolicy::default();
        let mut ctx = RetryContext::new();

        let delay = policy.schedule(&mut ctx, DramaboxError::upstream_status(404, "/x", "missing"));
        assert!(delay.is_none());
        assert!(!ctx.is_exhausted());
        assert!(matches!(
            ctx.into_error("detail"),
            DramaboxError::UpstreamStatus { status: 404, .. }
        ));
    }

    #[test]
    fn test_advance_counts_an_attempt() {
        let mut ctx = RetryContext::new();
        ctx.advance(DramaboxError::rejected("/x", "soft"));
        assert_eq!(ctx.attempt, 1);
        assert!(ctx.last_error.is_some());
    }
}
